/// init the logger once, repeated calls from tests are ignored
pub fn init_log() {
    let _ = env_logger::builder()
        .is_test(true)
        .format_timestamp(None)
        .try_init();
}
