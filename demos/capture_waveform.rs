use std::env;
use vds6104ctrl::proto::command::{Channel, Coupling, Measurement};
use vds6104ctrl::{Device, DEFAULT_PORT};

#[tokio::main]
async fn main() -> vds6104ctrl::Result<()> {
    env_logger::init();

    let host = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("192.168.1.72"));
    let mut device = Device::connect(&host, DEFAULT_PORT).await?;
    eprintln!("Connected to: {}\n", device.check_model().await?);

    device.set_coupling(Channel::Ch1, Coupling::Dc).await?;
    let scale = device.set_scale(Channel::Ch1, 0.3).await?;
    let timebase = device.set_timebase(230e-6).await?;
    eprintln!("Scale {} V/div, timebase {} s/div", scale, timebase);

    device.run().await?;
    let frequency = device.measure(Channel::Ch1, Measurement::Frequency).await?;
    eprintln!("Frequency: {}", frequency);

    let capture = device.capture(Channel::Ch1).await?;
    print!("{:.3}", capture);
    Ok(())
}
