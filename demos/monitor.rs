use smartac::{ApiFormat, SmartAcClient};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> smartac::Result<()> {
    tracing_subscriber::fmt::init();

    let username = env::var("SMARTAC_USERNAME").expect("SMARTAC_USERNAME must be set");
    let password = env::var("SMARTAC_PASSWORD").expect("SMARTAC_PASSWORD must be set");
    let modern = env::args().any(|a| a == "--modern");

    let mut builder = SmartAcClient::builder(username, password)
        .request_timeout(Duration::from_secs(30))
        .on_log(|subject, message| println!("[{subject}] {message}"))
        .on_event(|event| println!("{event:?}"));

    if modern {
        builder = builder.api_format(ApiFormat::Modern);
    }

    let client = builder.build()?;

    loop {
        match client.refresh().await {
            Ok(devices) => {
                for d in &devices {
                    println!(
                        "[{}] {}\u{00b0} -> {}\u{00b0} | {}{}",
                        d.name,
                        d.current_temperature,
                        d.target_temperature,
                        if d.power_on { "on" } else { "off" },
                        if d.is_reachable() { "" } else { " | OFFLINE" },
                    );
                }
            }
            Err(e) => eprintln!("Refresh error: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
