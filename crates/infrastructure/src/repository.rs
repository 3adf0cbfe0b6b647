use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    CourierId, DeliveryId, Position, PositionId, PositionRepository, RepositoryError,
    RepositoryResult,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct PositionRecord {
    id: Uuid,
    delivery_id: i64,
    courier_id: i64,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    altitude: Option<f64>,
    observed_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<PositionRecord> for Position {
    type Error = RepositoryError;

    fn try_from(value: PositionRecord) -> Result<Self, Self::Error> {
        let position = Position::with_id(
            PositionId(value.id),
            DeliveryId::new(value.delivery_id),
            CourierId::new(value.courier_id),
            value.latitude,
            value.longitude,
            value.observed_at,
            value.recorded_at,
        )
        .map_err(|err| invalid_data(err.to_string()))?;

        Ok(position
            .with_accuracy(value.accuracy)
            .with_speed(value.speed)
            .with_heading(value.heading)
            .with_altitude(value.altitude))
    }
}

/// 同一时间戳的记录按写入顺序（`seq`）决定先后
const SELECT_POSITIONS: &str = r#"
    SELECT id, delivery_id, courier_id, latitude, longitude, accuracy, speed, heading, altitude,
           observed_at, recorded_at
    FROM positions
"#;

#[derive(Clone)]
pub struct PgPositionRepository {
    pool: PgPool,
}

impl PgPositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn latest_where(&self, column: &str, id: i64) -> RepositoryResult<Position> {
        let sql = format!(
            "{SELECT_POSITIONS} WHERE {column} = $1 ORDER BY recorded_at DESC, seq DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record
            .map(Position::try_from)
            .transpose()?
            .ok_or(RepositoryError::NotFound)
    }

    async fn history_where(
        &self,
        column: &str,
        id: i64,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>> {
        let sql = format!(
            "{SELECT_POSITIONS} WHERE {column} = $1 ORDER BY recorded_at DESC, seq DESC LIMIT $2"
        );
        let records = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(Position::try_from).collect()
    }
}

#[async_trait]
impl PositionRepository for PgPositionRepository {
    async fn create(&self, position: &Position) -> RepositoryResult<Position> {
        let record = sqlx::query_as::<_, PositionRecord>(
            r#"
            INSERT INTO positions (id, delivery_id, courier_id, latitude, longitude, accuracy,
                                   speed, heading, altitude, observed_at, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, delivery_id, courier_id, latitude, longitude, accuracy, speed, heading,
                      altitude, observed_at, recorded_at
            "#,
        )
        .bind(position.id.0)
        .bind(position.delivery_id.value())
        .bind(position.courier_id.value())
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.accuracy)
        .bind(position.speed)
        .bind(position.heading)
        .bind(position.altitude)
        .bind(position.observed_at)
        .bind(position.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Position::try_from(record)
    }

    async fn latest_by_delivery(&self, delivery_id: DeliveryId) -> RepositoryResult<Position> {
        self.latest_where("delivery_id", delivery_id.value()).await
    }

    async fn history_by_delivery(
        &self,
        delivery_id: DeliveryId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>> {
        self.history_where("delivery_id", delivery_id.value(), limit)
            .await
    }

    async fn latest_by_courier(&self, courier_id: CourierId) -> RepositoryResult<Position> {
        self.latest_where("courier_id", courier_id.value()).await
    }

    async fn history_by_courier(
        &self,
        courier_id: CourierId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>> {
        self.history_where("courier_id", courier_id.value(), limit)
            .await
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
