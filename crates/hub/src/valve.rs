//! Valve control via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation only tracks and logs the state.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct ValveBoard {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    on: bool,
}

#[cfg(feature = "gpio")]
impl ValveBoard {
    pub(crate) fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let pin = gpio.get(gpio_pin)?.into_output();

        let mut board = Self {
            pin,
            active_low,
            on: true,
        };
        // Fail-safe: ensure "OFF" at startup
        board.set(false);
        Ok(board)
    }

    pub(crate) fn set(&mut self, on: bool) {
        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
        info!(gpio = self.pin.pin(), on, "valve set");
    }

    pub(crate) fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct ValveBoard {
    gpio_pin: u8,
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl ValveBoard {
    pub(crate) fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        info!(gpio = gpio_pin, "[mock-gpio] valve relay initialised (no hardware)");
        Ok(Self {
            gpio_pin,
            on: false,
        })
    }

    pub(crate) fn set(&mut self, on: bool) {
        self.on = on;
        info!(gpio = self.gpio_pin, on, "[mock-gpio] valve set");
    }

    pub(crate) fn is_on(&self) -> bool {
        self.on
    }
}

// ===========================================================================
// Tests
// ===========================================================================
