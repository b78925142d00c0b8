// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use clap::Parser;
use embassy_net_tuntap::TunTapDevice;
use lwm2m_api_core::options::ClientOptions;
use lwm2m_embedded::agent::ObjectTreeOptions;
use lwm2m_embedded::button::ButtonChannel;
use lwm2m_embedded::coap::{UDP_BUFFER_SIZE, UDP_PACKET_SLOTS};

mod settings;

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = String::from("lwm2m_client.toml"))]
    config_file: String,
    #[arg(short, long, default_value_t = String::from(""))]
    template: String,
}

/// Everything the emulator task needs, resolved before the executor starts.
struct Emulation {
    tap_interface: String,
    network: embassy_net::StaticConfigV6,
    options: ClientOptions,
    tree: ObjectTreeOptions,
    mock_button: Option<settings::MockButtonSettings>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Create a template configuration and exit.
    if !args.template.is_empty() {
        settings::create_template(&args.template, settings::lwm2m_client_default_conf().as_str())?;
        return Ok(());
    }

    let conf = settings::read_conf_from_file(&args.config_file)?;

    // RUST_LOG takes precedence over the verbose flag.
    let level = match conf.verbose {
        true => "debug",
        false => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    conf.validate()?;
    let emulation = Emulation {
        tap_interface: conf.network.tap_interface.clone(),
        network: conf.ipv6_config()?,
        options: conf.client_options(rand::random()),
        tree: conf.object_tree(),
        mock_button: conf.mock_button.clone(),
    };

    static EXECUTOR_RAW: static_cell::StaticCell<embassy_executor::Executor> = static_cell::StaticCell::new();
    let executor = EXECUTOR_RAW.init_with(embassy_executor::Executor::new);

    executor.run(|spawner| {
        if let Err(err) = spawner.spawn(emulator(spawner, emulation)) {
            log::error!("Could not start the emulator: {:?}", err);
        }
    })
}

#[embassy_executor::task]
async fn net_task(stack: &'static embassy_net::Stack<TunTapDevice>) -> ! {
    stack.run().await
}

#[embassy_executor::task]
async fn emulator(spawner: embassy_executor::Spawner, emulation: Emulation) {
    static RX_BUF_RAW: static_cell::StaticCell<[u8; UDP_BUFFER_SIZE]> = static_cell::StaticCell::new();
    let rx_buf = RX_BUF_RAW.init_with(|| [0_u8; UDP_BUFFER_SIZE]);
    static RX_META_RAW: static_cell::StaticCell<[embassy_net::udp::PacketMetadata; UDP_PACKET_SLOTS]> = static_cell::StaticCell::new();
    let rx_meta = RX_META_RAW.init_with(|| [embassy_net::udp::PacketMetadata::EMPTY; UDP_PACKET_SLOTS]);
    static TX_BUF_RAW: static_cell::StaticCell<[u8; UDP_BUFFER_SIZE]> = static_cell::StaticCell::new();
    let tx_buf = TX_BUF_RAW.init_with(|| [0_u8; UDP_BUFFER_SIZE]);
    static TX_META_RAW: static_cell::StaticCell<[embassy_net::udp::PacketMetadata; UDP_PACKET_SLOTS]> = static_cell::StaticCell::new();
    let tx_meta = TX_META_RAW.init_with(|| [embassy_net::udp::PacketMetadata::EMPTY; UDP_PACKET_SLOTS]);

    let device = match TunTapDevice::new(&emulation.tap_interface) {
        Ok(device) => device,
        Err(err) => {
            log::error!("Could not open TAP interface {}: {}", emulation.tap_interface, err);
            return;
        }
    };
    log::info!("Address {} on {}", emulation.network.address, emulation.tap_interface);
    if let Some(gateway) = emulation.network.gateway {
        log::info!("Default route via {}", gateway);
    }
    let config = embassy_net::Config::ipv6_static(emulation.network);

    static STACK_RESOURCES_RAW: static_cell::StaticCell<embassy_net::StackResources<3>> = static_cell::StaticCell::new();
    static STACK_RAW: static_cell::StaticCell<embassy_net::Stack<TunTapDevice>> = static_cell::StaticCell::new();
    let stack = STACK_RAW.init_with(|| {
        embassy_net::Stack::new(
            device,
            config,
            STACK_RESOURCES_RAW.init_with(embassy_net::StackResources::<3>::new),
            rand::random(),
        )
    });

    if let Err(err) = spawner.spawn(net_task(stack)) {
        log::error!("Could not start the network task: {:?}", err);
        return;
    }

    let sock = embassy_net::udp::UdpSocket::new(stack, rx_meta, rx_buf, tx_meta, tx_buf);

    static BUTTONS_RAW: static_cell::StaticCell<ButtonChannel> = static_cell::StaticCell::new();
    let buttons: &'static ButtonChannel = BUTTONS_RAW.init_with(ButtonChannel::new);

    let client = lwm2m_embedded::agent::start(emulation.options, &emulation.tree);

    if let Err(err) = spawner.spawn(lwm2m_embedded::coap::lwm2m_task(sock, buttons.receiver(), client)) {
        log::error!("Could not start the LwM2M task: {:?}", err);
        return;
    }

    if let Some(button) = emulation.mock_button {
        log::info!("Mock button on digital input {} every {} ms", button.input, button.period_ms);
        let period = embassy_time::Duration::from_millis(button.period_ms);
        if let Err(err) = spawner.spawn(lwm2m_embedded::button::mock_button_task(buttons.sender(), button.input, period)) {
            log::error!("Could not start the mock button: {:?}", err);
        }
    }
}
