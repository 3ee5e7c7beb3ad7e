//! Starts one control loop per bound actuator and waits on all of them.

use crate::control::controller::{ActuatorController, ControllerContext, ControllerSettings, build_controller};
use crate::ports::{Clock, LineProvider, Store};
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinSet;

pub struct ActuatorScheduler<S> {
    store: Arc<S>,
    lines: Arc<dyn LineProvider>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
}

impl<S: Store> ActuatorScheduler<S> {
    pub fn new(
        store: Arc<S>,
        lines: Arc<dyn LineProvider>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        ActuatorScheduler {
            store,
            lines,
            clock,
            settings,
        }
    }

    /// One controller per actuator with a behavior binding. A misconfigured
    /// actuator is logged and left out; the others still start.
    pub async fn build(&self) -> Result<Vec<ActuatorController<S>>, String> {
        let bindings = self
            .store
            .bindings()
            .await
            .map_err(|e| format!("Loading actuator bindings failed: {}", e))?;
        info!("Scheduler: {} bound actuator(s)", bindings.len());

        let mut controllers = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let ctx = ControllerContext {
                actuator_id: binding.actuator_id.clone(),
                store: Arc::clone(&self.store),
                lines: Arc::clone(&self.lines),
                clock: Arc::clone(&self.clock),
                settings: self.settings,
            };
            match build_controller(binding, ctx).await {
                Ok(controller) => controllers.push(controller),
                Err(e) => error!("Scheduler: actuator {} not started: {}", binding.actuator_id, e),
            }
        }
        Ok(controllers)
    }

    /// Run every controller concurrently. Controllers never return under
    /// normal operation, so neither does this. The one exit path is an empty
    /// build: with no runnable actuator it returns `Ok` straight away.
    pub async fn run(&self) -> Result<(), String> {
        let controllers = self.build().await?;
        if controllers.is_empty() {
            error!("Scheduler: no runnable actuators, nothing to control");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for controller in controllers {
            info!(
                "Scheduler: starting {} ({})",
                controller.context().actuator_id,
                controller.kind()
            );
            tasks.spawn(controller.run());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Scheduler: controller task ended: {}", e);
            }
        }
        Ok(())
    }
}
