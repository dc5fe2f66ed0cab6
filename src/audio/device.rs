// Audio device lookup and config selection on top of cpal

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleRate, SupportedStreamConfig};
use log::warn;

use crate::error::AudioError;

pub fn default_input_device() -> Result<Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))
}

pub fn default_output_device() -> Result<Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))
}

/// Names of all visible input devices, for diagnostics
pub fn list_input_devices() -> Vec<String> {
    match cpal::default_host().input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

pub fn list_output_devices() -> Vec<String> {
    match cpal::default_host().output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Failed to enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

pub fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

pub fn input_config(device: &Device) -> Result<SupportedStreamConfig, AudioError> {
    device
        .default_input_config()
        .map_err(|e| AudioError::UnsupportedConfig {
            name: device_name(device),
            reason: e.to_string(),
        })
}

/// Pick an output config that can run at `preferred_rate` so playback needs
/// no resampling; fall back to the device default otherwise.
pub fn output_config(device: &Device, preferred_rate: u32) -> Result<SupportedStreamConfig, AudioError> {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.channels() >= 1
                && range.min_sample_rate() <= SampleRate(preferred_rate)
                && SampleRate(preferred_rate) <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(SampleRate(preferred_rate)));
            }
        }
    }

    device
        .default_output_config()
        .map_err(|e| AudioError::UnsupportedConfig {
            name: device_name(device),
            reason: e.to_string(),
        })
}
