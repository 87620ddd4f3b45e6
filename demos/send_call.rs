use gbxremote::{Client, ConnectOptions, Value};

#[tokio::main]
async fn main() -> gbxremote::Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5000".to_string());

    let client = Client::new();
    client.subscribe_connected(|| log::info!("connected"));
    client.subscribe_disconnected(|| log::info!("disconnected"));
    client.subscribe_callback(|call| log::info!("callback: {} {:?}", call.name, call.params));

    client.connect(addr, ConnectOptions::default()).await?;

    let result = client
        .call("system.listMethods", vec![Value::String("".to_string())])
        .await?;
    println!("{result:?}");

    client.disconnect().await;
    Ok(())
}
