use anyhow::{bail, Result};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

use dojo_client::{AuthUser, Dojo, SupabaseClient};

use crate::config::{config_path, Config, ANON_KEY_ENV, URL_ENV};
use crate::state::{self, Focus};

/// One CLI invocation's view of the dojo: restored session, loaded katas,
/// and the focus pointer from the last run.
pub struct App {
    pub dojo: Dojo,
    pub tz: Tz,
    pub config: Config,
    client: Arc<SupabaseClient>,
}

impl App {
    pub async fn open(config: Config) -> Result<Self> {
        if !config.backend_configured() {
            bail!(
                "No backend configured. Set [backend] url and anon_key in {} (or {URL_ENV} / {ANON_KEY_ENV}).",
                config_path()?.display()
            );
        }
        let tz = config.timezone()?;

        let client = Arc::new(SupabaseClient::with_session(
            config.supabase(),
            state::load_session()?,
        ));
        let dojo = Dojo::with_init_timeout(client.clone(), client.clone(), config.init_timeout());
        dojo.start().await;

        if let Some(id) = state::load_focus()?.active_task_id {
            if let Err(err) = dojo.tasks().set_active(Some(&id)) {
                debug!(task_id = %id, error = %err, "dropping stale focus");
            }
        }

        Ok(Self {
            dojo,
            tz,
            config,
            client,
        })
    }

    /// Write the (possibly refreshed) session and the focus pointer back.
    pub fn persist(&self) -> Result<()> {
        state::save_session(self.client.current_session().as_ref())?;
        state::save_focus(&Focus {
            active_task_id: self.dojo.tasks().active_task_id(),
        })
    }

    pub fn require_user(&self) -> Result<AuthUser> {
        match self.dojo.session().user() {
            Some(user) => Ok(user),
            None => bail!("Not signed in. Run: dojo auth login --email <email>"),
        }
    }
}
