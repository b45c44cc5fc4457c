use anyhow::Result;

use crate::config::AppConfig;

pub struct Repositories {
    #[cfg(feature = "db")]
    pub db: Option<crate::repo::pg::PgRepo>,
}

impl Repositories {
    pub async fn new(cfg: &AppConfig) -> Result<Self> {
        #[cfg(feature = "db")]
        {
            let db = match &cfg.database {
                Some(db_cfg) => Some(crate::repo::pg::PgRepo::connect(&db_cfg.url()).await?),
                None => None,
            };
            return Ok(Self { db });
        }

        #[cfg(not(feature = "db"))]
        {
            let _ = cfg;
            return Ok(Self {});
        }
    }
}

#[cfg(feature = "db")]
pub mod pg;
