// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use embassy_futures::select::{select3, Either3};
use embassy_net::udp::UdpSocket;
use embassy_time::{Instant, Timer};
use lwm2m_api_core::client::{ClientEvent, Lwm2mClient};
use lwm2m_api_core::transport::Outbox;

use crate::button::ButtonReceiver;

pub const UDP_BUFFER_SIZE: usize = 4096;
pub const UDP_PACKET_SLOTS: usize = 8;
pub const MAX_COAP_MESSAGE_SIZE: usize = 1280;

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

async fn flush(sock: &UdpSocket<'_>, outbox: &mut Outbox) {
    while let Some(datagram) = outbox.pop() {
        if let Err(err) = sock.send_to(&datagram.data, crate::net::to_endpoint(datagram.to)).await {
            log::error!("UDP/COAP Send Error: {:?}", err);
        }
    }
}

/// Application side of the client events. Rebooting is left to the board.
fn log_events(client: &mut Lwm2mClient) {
    while let Some(event) = client.poll_event() {
        match event {
            ClientEvent::Bootstrapped => log::info!("Bootstrap finished"),
            ClientEvent::Registered => match client.registration_location() {
                Some(location) => log::info!("Registered at {}", location),
                None => log::info!("Registered"),
            },
            ClientEvent::Deregistered => log::info!("Deregistered"),
            ClientEvent::Reboot => log::warn!("Reboot requested by server"),
            ClientEvent::FactoryReset => log::warn!("Factory reset requested by server"),
            ClientEvent::Execute { path, arguments } => log::info!("Execute {} ({} argument bytes)", path, arguments.len()),
        }
    }
}

/// Drives the client: runs `process`, sends what it produced and then sleeps until the next
/// deadline, a datagram or a button event, whichever comes first.
#[embassy_executor::task]
pub async fn lwm2m_task(mut sock: UdpSocket<'static>, buttons: ButtonReceiver, client: Lwm2mClient) {
    let mut client = client;
    let mut app_buf = [0_u8; MAX_COAP_MESSAGE_SIZE];
    let mut outbox = Outbox::new();

    let port = client.options().coap_port;
    if let Err(err) = sock.bind(port) {
        log::error!("Failed to bind CoAP port {}: {:?}", port, err);
        return;
    }

    loop {
        let wait_ms = client.process(now_ms(), &mut outbox);
        flush(&sock, &mut outbox).await;
        log_events(&mut client);

        let res = select3(sock.recv_from(&mut app_buf), Timer::after_millis(wait_ms), buttons.receive()).await;

        match res {
            Either3::First(Ok((data_len, sender))) => {
                client.handle_datagram(now_ms(), crate::net::to_socket_addr(sender), &app_buf[..data_len], &mut outbox);
            }
            Either3::First(Err(err)) => {
                log::error!("UDP/COAP Receive Error: {:?}", err);
            }
            Either3::Second(()) => {}
            Either3::Third(event) => crate::agent::on_button_event(&mut client, event),
        }
    }
}
