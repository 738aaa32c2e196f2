//! Scheduler pipeline (`canonicalName = saito`). The only trigger this
//! identity recognizes is a `cron.tick` gateway event; the handler never
//! invokes the LLM, it only hands off to Kairo over the chat fabric.

use sa_domain::Result;

use crate::state::AppState;

/// Deterministically forward a trigger message to the `kairo` messaging
/// target. Kairo recognizes this exact phrase as its scheduled-cycle
/// trigger (see `kairo::is_trigger_message`).
pub async fn handle_cron_tick(state: &AppState, trace_id: &str) -> Result<()> {
    let Some(config) = state.config() else {
        return Err(sa_domain::Error::Other("saito: no active config".into()));
    };

    state
        .send_to_target(&config, "kairo", "Saito scheduled trigger: portfolio analysis cycle")
        .await?;

    tracing::info!(trace_id = %trace_id, "saito: dispatched scheduled trigger to kairo");
    Ok(())
}
