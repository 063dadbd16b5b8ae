//! HTU21D weather node: ESP32 firmware with the `esp32` feature, otherwise a
//! workstation build that drives the same node loop against a real broker.

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;
#[cfg(any(feature = "esp32", test))]
mod htu21d;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
