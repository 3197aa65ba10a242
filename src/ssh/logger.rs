// ABOUTME: Optional command-tracing capability for sessions.
// ABOUTME: TracingLogger forwards trace events to the tracing ecosystem.

/// Receives debug events as an event name plus ordered key/value pairs.
pub trait Logger: Send + Sync {
    fn debug(&self, event: &str, fields: &[(&str, &str)]);
}

/// Forwards events to `tracing::debug!` on target `fleetsh::trace`.
///
/// The `server`, `username` and `cmd` keys become tracing fields of the same
/// name; any other keys are rendered into `extra`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, event: &str, fields: &[(&str, &str)]) {
        let (mut server, mut username, mut cmd) = (None, None, None);
        let mut extra = Vec::new();
        for &(key, value) in fields {
            match key {
                "server" => server = Some(value),
                "username" => username = Some(value),
                "cmd" => cmd = Some(value),
                _ => extra.push(format!("{key}={value:?}")),
            }
        }

        if extra.is_empty() {
            tracing::debug!(target: "fleetsh::trace", event, server, username, cmd, "{event}");
        } else {
            let extra = extra.join(" ");
            tracing::debug!(
                target: "fleetsh::trace",
                event,
                server,
                username,
                cmd,
                extra = %extra,
                "{event}"
            );
        }
    }
}
