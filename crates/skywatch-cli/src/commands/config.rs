use skywatch_core::{SessionSettings, SkywatchConfig};

pub fn init(url: &str) -> anyhow::Result<()> {
    let config = SkywatchConfig::scaffold(url);
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn show(settings: &SessionSettings) -> anyhow::Result<()> {
    let policy = &settings.reconnect;
    let backoff = if policy.backoff_initial.is_zero() {
        "immediate".to_string()
    } else {
        format!("{:?} doubling to {:?}", policy.backoff_initial, policy.backoff_max)
    };

    println!("url           {}", settings.url);
    println!("filter        {}", settings.filter);
    println!("heartbeat     {:?}", settings.heartbeat_interval);
    println!("max_attempts  {}", policy.max_attempts);
    println!("backoff       {backoff}");
    Ok(())
}
