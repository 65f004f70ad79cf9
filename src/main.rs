//! ag - chat with Qwen from the terminal.
//!
//! `ag` enters chat (starting the qwen-server unit first if it is down),
//! `ag -s` shows service status, `ag -k` stops the service and `ag -h`
//! prints usage. Any other argument is treated like no argument.

use anyhow::Result;
use qwen_fast::client::SocketFrontend;
use qwen_fast::config::Config;
use qwen_fast::dispatch::{Action, Dispatcher};
use qwen_fast::logging;
use qwen_fast::service::Systemctl;

#[tokio::main]
async fn main() -> Result<()> {
    let action = Action::from_args(std::env::args().skip(1));
    logging::init("warn");

    let config = if action.needs_config() {
        Config::load()?
    } else {
        Config::default()
    };

    let dispatcher = Dispatcher::new(
        Systemctl::new(&config.service),
        SocketFrontend::new(&config),
        config.service.grace_period(),
    );

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    if let Err(e) = dispatcher.dispatch(action, &mut stdout, &mut stderr).await {
        eprintln!("Error: {:#}", anyhow::Error::from(e));
        std::process::exit(1);
    }
    Ok(())
}
