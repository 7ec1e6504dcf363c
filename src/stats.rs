//! Rendering of the `info` statistics block.

use crate::engine::{Engine, Snapshot};

fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

/// Render the exact labeled block a peer receives in reply to `info`.
pub fn render(engine: &Engine) -> String {
    let snap: Snapshot = engine.snapshot();
    let user_requested_subscriptions = snap
        .current_subscriptions
        .saturating_sub(snap.current_connections);

    format!(
        "uptime: {uptime}\n\
         client-limit: {client_limit}\n\
         limit rejected connections: {rejected}\n\
         rlimits: Soft={soft} Hard={hard}\n\
         max connections: {high_water}\n\
         current connections: {current_connections}\n\
         current channels: {current_channels}\n\
         current subscriptions: {current_subscriptions}\n\
         user-requested subscriptions: {user_requested_subscriptions}\n\
         total connections: {total_connections}\n\
         total announcements: {total_announcements}\n\
         total messages: {total_messages}\n\
         total subscribes: {total_subscribes}\n\
         total unsubscribes: {total_unsubscribes}\n\
         total pings: {total_pings}\n",
        uptime = format_uptime(snap.uptime_secs),
        client_limit = snap.client_limit,
        rejected = snap.client_limit_rejections,
        soft = snap.soft_rlimit,
        hard = snap.hard_rlimit,
        high_water = snap.high_water_mark,
        current_connections = snap.current_connections,
        current_channels = snap.current_channels,
        current_subscriptions = snap.current_subscriptions,
        total_connections = snap.total_connections,
        total_announcements = snap.total_announcements,
        total_messages = snap.total_messages,
        total_subscribes = snap.total_subscribes,
        total_unsubscribes = snap.total_unsubscribes,
        total_pings = snap.total_pings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_breaks_down_into_days_hours_minutes_seconds() {
        assert_eq!(format_uptime(0), "0d 0h 0m 0s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }

    #[test]
    fn renders_every_labeled_field_in_order() {
        let engine = Engine::new(10, 1024, 2048);
        let rendered = render(&engine);
        let labels = [
            "uptime:",
            "client-limit:",
            "limit rejected connections:",
            "rlimits:",
            "max connections:",
            "current connections:",
            "current channels:",
            "current subscriptions:",
            "user-requested subscriptions:",
            "total connections:",
            "total announcements:",
            "total messages:",
            "total subscribes:",
            "total unsubscribes:",
            "total pings:",
        ];
        let mut last_pos = 0;
        for label in labels {
            let pos = rendered.find(label).expect("label present");
            assert!(pos >= last_pos, "label {label} out of order");
            last_pos = pos;
        }
    }
}
