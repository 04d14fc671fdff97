use swmr_test_harness::Env;

fn main() {}

const SWMR_CLI: &str = env!("CARGO_BIN_FILE_SWMR_CLI_swmr-cli");

#[test]
fn writer_then_reader_see_the_same_index() {
    let env = Env::new();

    env.cmd(SWMR_CLI)
        .args(["writer", "--ticks", "3", "--tick-len-tenths", "1", "--write", "1:7=hello"])
        .assert()
        .success()
        .stdout(predicates::str::contains("index_entries=1"));

    env.cmd(SWMR_CLI)
        .args(["reader", "--ticks", "1", "--tick-len-tenths", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("index_entries=1"));
}

#[test]
fn reader_before_any_writer_activity_sees_an_empty_index() {
    let env = Env::new();

    env.cmd(SWMR_CLI)
        .args(["writer", "--ticks", "1", "--tick-len-tenths", "1"])
        .assert()
        .success();

    env.cmd(SWMR_CLI)
        .args(["reader", "--ticks", "1", "--tick-len-tenths", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("index_entries=0"));
}

#[test]
fn malformed_write_flag_is_a_usage_error() {
    let env = Env::new();

    env.cmd(SWMR_CLI).args(["writer", "--write", "not-a-write"]).assert().failure();
}
