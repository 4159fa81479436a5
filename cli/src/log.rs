use log::LevelFilter;
use log4rs::Config;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::path::Path;

pub fn init_log(logs_path: &str, log_level: LevelFilter) -> Result<(), Box<dyn Error>> {
    let log_path = Path::new(logs_path).join("xec-wallet.log");

    let encoder = Box::new(PatternEncoder::new(
        "{d(%Y-%m-%dT%H:%M:%S)(utc)} [{l}] {m}{n}",
    ));

    let stdout = ConsoleAppender::builder().encoder(encoder.clone()).build();

    let roller = Box::new(
        FixedWindowRoller::builder().build(&format!("{}{}.gz", log_path.display(), "{}"), 10)?,
    );
    let trigger = Box::new(SizeTrigger::new(10_000_000));
    let rolling_policy = Box::new(CompoundPolicy::new(trigger, roller));
    let file = RollingFileAppender::builder()
        .encoder(encoder)
        .build(log_path, rolling_policy)?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("file")
                .build(log_level),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}
