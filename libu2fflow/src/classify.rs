use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{ClassifiedError, ErrorKind};

// https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-javascript-api-v1.2-ps-20170411.html#error-codes

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceStatus {
    Ok = 0,
    OtherError = 1,
    BadRequest = 2,
    ConfigurationUnsupported = 3,
    DeviceIneligible = 4,
    Timeout = 5,
}

pub const REGISTRATION_PROBLEM: &str =
    "There was a problem registering your device. Please try again.";
pub const INCORRECT_DEVICE: &str =
    "Incorrect device used. Please verify you have the correct device and try again.";
pub const TOUCH_REQUIRED: &str = "Please touch the device to continue.";

/// Which ceremony a status code came from; decides the failure kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowKind {
    Registration,
    Authentication,
}

impl FlowKind {
    fn failure_kind(&self) -> ErrorKind {
        match self {
            FlowKind::Registration => ErrorKind::RegistrationFailed,
            FlowKind::Authentication => ErrorKind::AuthFailed,
        }
    }
}

/// Maps a non-zero device status to the error shown to the user.
pub fn classify(status: u32, flow: FlowKind, ineligible: Option<&str>) -> ClassifiedError {
    match DeviceStatus::try_from(status) {
        Ok(DeviceStatus::OtherError)
        | Ok(DeviceStatus::BadRequest)
        | Ok(DeviceStatus::ConfigurationUnsupported) => {
            ClassifiedError::new(flow.failure_kind(), REGISTRATION_PROBLEM)
        }
        Ok(DeviceStatus::DeviceIneligible) => ClassifiedError::new(
            ErrorKind::DeviceIneligible,
            ineligible.unwrap_or(INCORRECT_DEVICE),
        ),
        Ok(DeviceStatus::Timeout) => {
            ClassifiedError::new(ErrorKind::UserActionRequired, TOUCH_REQUIRED)
        }
        // Success never reaches classification; treat a stray zero like any unknown code.
        Ok(DeviceStatus::Ok) | Err(_) => ClassifiedError::new(
            flow.failure_kind(),
            format!("An unknown device error occurred (code {}).", status),
        ),
    }
}
