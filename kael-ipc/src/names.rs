/// Template event names, `$dynamic` substituted with the target process id.
/// Mirrors the six rendezvous events the agent and monitor share.
pub const EVENT_INTERRUPT: &str = "Global\\kael.leak.$dynamic.interrupt";
pub const EVENT_INTERRUPT_CONTINUE: &str = "Global\\kael.leak.$dynamic.interrupt.continue";
pub const EVENT_START: &str = "Global\\kael.leak.$dynamic.start";
pub const EVENT_START_CONFIRM: &str = "Global\\kael.leak.$dynamic.start.confirm";
pub const EVENT_STOP: &str = "Global\\kael.leak.$dynamic.stop";
pub const EVENT_STOP_CONFIRM: &str = "Global\\kael.leak.$dynamic.stop.confirm";

/// Substitutes `$dynamic` in a template event name with `pid`.
pub fn replace_event_name(template: &str, pid: u32) -> String {
    template.replace("$dynamic", &pid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_pid_into_template() {
        let name = replace_event_name(EVENT_INTERRUPT, 4242);
        assert_eq!(name, "Global\\kael.leak.4242.interrupt");
    }

    #[test]
    fn distinct_pids_produce_distinct_names() {
        let a = replace_event_name(EVENT_START, 1);
        let b = replace_event_name(EVENT_START, 2);
        assert_ne!(a, b);
    }
}
