//! GPIO line access for push-to-talk
//!
//! Lines are requested through the Linux GPIO character device. Active-low
//! inversion is applied by the kernel, so callers always deal in logical
//! levels: `true` means asserted.

use crate::config::{LineBias, LineDrive};
use crate::error::PttError;

const CONSUMER: &str = "voxcrypt";

/// A requested GPIO line
pub trait GpioLine: Send {
    /// Read the logical line level
    fn get_value(&mut self) -> Result<bool, PttError>;

    /// Drive the logical line level
    fn set_value(&mut self, value: bool) -> Result<(), PttError>;
}

/// Request `offset` on `chip` as an input
pub fn open_input(
    chip: &str,
    offset: u32,
    active_low: bool,
    bias: LineBias,
) -> Result<Box<dyn GpioLine>, PttError> {
    warn_unsupported_bias(offset, bias);
    imp::request(chip, offset, imp::input_flags(active_low), false)
}

/// Request `offset` on `chip` as an output, initially de-asserted
pub fn open_output(
    chip: &str,
    offset: u32,
    active_low: bool,
    bias: LineBias,
    drive: LineDrive,
) -> Result<Box<dyn GpioLine>, PttError> {
    warn_unsupported_bias(offset, bias);
    imp::request(chip, offset, imp::output_flags(active_low, drive), false)
}

fn warn_unsupported_bias(offset: u32, bias: LineBias) {
    // The v1 character-device ABI has no bias flags
    if bias != LineBias::AsIs {
        tracing::warn!(
            "GPIO line {}: bias {:?} not supported by this kernel interface, leaving as-is",
            offset,
            bias
        );
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::{GpioLine, CONSUMER};
    use crate::config::LineDrive;
    use crate::error::PttError;
    use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

    struct CdevLine {
        handle: LineHandle,
    }

    impl GpioLine for CdevLine {
        fn get_value(&mut self) -> Result<bool, PttError> {
            Ok(self.handle.get_value()? != 0)
        }

        fn set_value(&mut self, value: bool) -> Result<(), PttError> {
            self.handle.set_value(value as u8)?;
            Ok(())
        }
    }

    pub(super) fn input_flags(active_low: bool) -> LineRequestFlags {
        let mut flags = LineRequestFlags::INPUT;
        if active_low {
            flags |= LineRequestFlags::ACTIVE_LOW;
        }
        flags
    }

    pub(super) fn output_flags(active_low: bool, drive: LineDrive) -> LineRequestFlags {
        let mut flags = LineRequestFlags::OUTPUT;
        if active_low {
            flags |= LineRequestFlags::ACTIVE_LOW;
        }
        match drive {
            LineDrive::PushPull => {}
            LineDrive::OpenDrain => flags |= LineRequestFlags::OPEN_DRAIN,
            LineDrive::OpenSource => flags |= LineRequestFlags::OPEN_SOURCE,
        }
        flags
    }

    pub(super) fn request(
        chip: &str,
        offset: u32,
        flags: LineRequestFlags,
        initial: bool,
    ) -> Result<Box<dyn GpioLine>, PttError> {
        let mut chip_handle =
            Chip::new(chip).map_err(|e| PttError::ChipAccess(format!("{}: {}", chip, e)))?;

        let line_request_error = |e: gpio_cdev::Error| PttError::LineRequest {
            chip: chip.to_string(),
            offset,
            reason: e.to_string(),
        };

        tracing::debug!("Requesting GPIO {}:{} ({:?})", chip, offset, flags);
        let handle = chip_handle
            .get_line(offset)
            .and_then(|line| line.request(flags, initial as u8, CONSUMER))
            .map_err(line_request_error)?;

        Ok(Box::new(CdevLine { handle }))
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::GpioLine;
    use crate::config::LineDrive;
    use crate::error::PttError;

    pub(super) fn input_flags(_active_low: bool) {}

    pub(super) fn output_flags(_active_low: bool, _drive: LineDrive) {}

    pub(super) fn request(
        _chip: &str,
        _offset: u32,
        _flags: (),
        _initial: bool,
    ) -> Result<Box<dyn GpioLine>, PttError> {
        Err(PttError::NotSupported)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use gpio_cdev::LineRequestFlags;

    #[test]
    fn test_output_flags() {
        let flags = imp::output_flags(true, LineDrive::OpenDrain);
        assert!(flags.contains(LineRequestFlags::OUTPUT));
        assert!(flags.contains(LineRequestFlags::ACTIVE_LOW));
        assert!(flags.contains(LineRequestFlags::OPEN_DRAIN));
        assert!(!flags.contains(LineRequestFlags::OPEN_SOURCE));
    }

    #[test]
    fn test_input_flags() {
        assert_eq!(imp::input_flags(false).bits(), LineRequestFlags::INPUT.bits());

        let flags = imp::input_flags(true);
        assert_eq!(
            flags.bits(),
            (LineRequestFlags::INPUT | LineRequestFlags::ACTIVE_LOW).bits()
        );
    }

    #[test]
    fn test_missing_chip_reports_access_error() {
        let result = open_input("/dev/voxcrypt-no-such-chip", 3, false, LineBias::AsIs);
        assert!(matches!(result, Err(PttError::ChipAccess(_))));
    }
}
