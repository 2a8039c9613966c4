pub mod alarm;
pub mod clock;
pub mod config;
pub mod instance;

use std::sync::Arc;

use chrono::NaiveDateTime;
use deskclock_core::{
    AlarmStateManager, Clock, Config, Database, ManualClock, SystemClock, TracingGateway,
};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs: the store and a manager wired to it.
pub struct App {
    pub db: Arc<Database>,
    pub manager: Arc<AlarmStateManager>,
    pub config: Config,
}

impl App {
    pub fn open(at: Option<NaiveDateTime>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load_or_default();
        let db = Arc::new(Database::open()?);
        let clock: Arc<dyn Clock> = match at {
            Some(now) => Arc::new(ManualClock::new(now)),
            None => Arc::new(SystemClock),
        };
        let manager = AlarmStateManager::new(
            db.clone(),
            Arc::new(db.scheduler()),
            Arc::new(TracingGateway),
            clock,
        )
        .with_timing(config.timing())
        .with_ringtones(Arc::new(config.ringtone_resolver()));
        Ok(Self {
            db,
            manager: Arc::new(manager),
            config,
        })
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `YYYY-MM-DDTHH:MM` or `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_local_time(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .map_err(|_| format!("expected YYYY-MM-DDTHH:MM[:SS], got '{s}'"))
}
