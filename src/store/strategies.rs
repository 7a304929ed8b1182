//! Strategy store: durable record of exit strategies with their typed
//! configuration serialized as a tagged JSON union.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::model::{Strategy, StrategyConfig, StrategyStatus};
use crate::store::{column_datetime, column_uuid, conversion_error, opt_rfc3339, Db};

pub struct StrategyStore {
    db: Arc<Db>,
}

impl StrategyStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn create(&self, strategy: &Strategy) -> Result<()> {
        let config = serde_json::to_string(&strategy.config)?;
        self.db.with(|conn| {
            conn.execute(
                r#"
                INSERT INTO strategies (id, position_id, strategy_type, status, config,
                                        created_at, updated_at, triggered_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    strategy.id.to_string(),
                    strategy.position_id.to_string(),
                    strategy.strategy_type().as_str(),
                    strategy.status.as_str(),
                    config,
                    strategy.created_at.to_rfc3339(),
                    strategy.updated_at.to_rfc3339(),
                    opt_rfc3339(&strategy.triggered_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn update(&self, strategy: &Strategy) -> Result<()> {
        let config = serde_json::to_string(&strategy.config)?;
        self.db.with(|conn| {
            conn.execute(
                r#"
                UPDATE strategies
                SET status = ?2, config = ?3, updated_at = ?4, triggered_at = ?5
                WHERE id = ?1
                "#,
                params![
                    strategy.id.to_string(),
                    strategy.status.as_str(),
                    config,
                    strategy.updated_at.to_rfc3339(),
                    opt_rfc3339(&strategy.triggered_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, strategy_id: Uuid) -> Result<Strategy> {
        self.db
            .with(|conn| {
                conn.query_row(
                    "SELECT id, position_id, status, config, created_at, updated_at, triggered_at
                     FROM strategies WHERE id = ?1",
                    params![strategy_id.to_string()],
                    strategy_from_row,
                )
                .optional()
            })?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))
    }

    pub fn get_by_position(&self, position_id: Uuid) -> Result<Vec<Strategy>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, position_id, status, config, created_at, updated_at, triggered_at
                 FROM strategies WHERE position_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![position_id.to_string()], strategy_from_row)?;
            rows.collect()
        })
    }

    /// All strategies the supervisor should evaluate.
    pub fn get_active(&self) -> Result<Vec<Strategy>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, position_id, status, config, created_at, updated_at, triggered_at
                 FROM strategies WHERE status = 'active' ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], strategy_from_row)?;
            rows.collect()
        })
    }
}

fn strategy_from_row(row: &Row<'_>) -> rusqlite::Result<Strategy> {
    let status: String = row.get(2)?;
    let config: String = row.get(3)?;
    Ok(Strategy {
        id: column_uuid(0, &row.get::<_, String>(0)?)?,
        position_id: column_uuid(1, &row.get::<_, String>(1)?)?,
        status: StrategyStatus::parse(&status)
            .ok_or_else(|| conversion_error(2, "status", &status))?,
        config: serde_json::from_str::<StrategyConfig>(&config)
            .map_err(|_| conversion_error(3, "strategy config", &config))?,
        created_at: column_datetime(4, &row.get::<_, String>(4)?)?,
        updated_at: column_datetime(5, &row.get::<_, String>(5)?)?,
        triggered_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| column_datetime(6, &s))
            .transpose()?,
    })
}
