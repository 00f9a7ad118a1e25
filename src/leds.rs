/// Activity indicator on the board LED.
use embassy_rp::gpio::Output;

pub struct ActivityLed<'d> {
    led: Output<'d>,
}

impl<'d> ActivityLed<'d> {
    pub fn new(led: Output<'d>) -> Self {
        Self { led }
    }

    /// Lit while a command is being executed.
    #[inline]
    pub fn set_busy(&mut self, on: bool) {
        if on {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
    }
}
