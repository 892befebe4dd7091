pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_name() -> String {
    "Nudge".to_string()
}

pub(super) fn default_data_dir() -> String {
    "~/.nudge".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_db_path() -> String {
    "~/.nudge/data/nudge.db".to_string()
}

pub(super) fn default_max_connections() -> u32 {
    4
}

pub(super) fn default_workers() -> usize {
    4
}

pub(super) fn default_max_sends_per_second() -> u32 {
    10
}

pub(super) fn default_poll_interval_ms() -> u64 {
    500
}

pub(super) fn default_max_attempts() -> u32 {
    3
}

pub(super) fn default_backoff_base_secs() -> u64 {
    5
}

pub(super) fn default_backoff_max_secs() -> u64 {
    300
}

pub(super) fn default_lease_secs() -> u64 {
    120
}

pub(super) fn default_sweep_interval_secs() -> u64 {
    300
}

pub(super) fn default_lookahead_secs() -> u64 {
    3600
}

pub(super) fn default_notifier_timeout_secs() -> u64 {
    15
}

pub(super) fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

pub(super) fn default_history_window() -> i64 {
    6
}
