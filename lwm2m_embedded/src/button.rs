// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::InputPin;
use embedded_hal_async::digital::Wait;
use lwm2m_api_core::object::InstanceId;

pub const BUTTON_QUEUE_DEPTH: usize = 4;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(20);

/// Edge seen on the button wired to a digital input instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed(InstanceId),
    Released(InstanceId),
}

pub type ButtonChannel = embassy_sync::channel::Channel<NoopRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH>;
pub type ButtonSender = embassy_sync::channel::Sender<'static, NoopRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH>;
pub type ButtonReceiver = embassy_sync::channel::Receiver<'static, NoopRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH>;

/// Forwards the edges of an active-low button on `pin` as events for digital input `input`.
///
/// Tasks cannot be generic, so boards wrap this in their own `#[embassy_executor::task]` for
/// their concrete pin type. Returns only when the pin reports an error.
pub async fn watch_button<P: Wait + InputPin>(
    input: InstanceId,
    mut pin: P,
    debounce: Duration,
    sender: embassy_sync::channel::Sender<'_, NoopRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH>,
) -> Result<(), P::Error> {
    let mut last = None;
    loop {
        pin.wait_for_any_edge().await?;
        if debounce.as_ticks() > 0 {
            Timer::after(debounce).await;
        }
        let event = if pin.is_high()? {
            ButtonEvent::Released(input)
        } else {
            ButtonEvent::Pressed(input)
        };
        // Bounces that settle on the previous level are not edges.
        if last == Some(event) {
            continue;
        }
        last = Some(event);
        sender.send(event).await;
    }
}

/// Presses the button of `input` every `period`, for hosts without a physical button.
#[embassy_executor::task]
pub async fn mock_button_task(sender: ButtonSender, input: InstanceId, period: Duration) {
    loop {
        Timer::after(period).await;
        log::debug!("Mock button {} pressed", input);
        sender.send(ButtonEvent::Pressed(input)).await;
    }
}
