//! Frame source: device selection and session lifecycle.
//!
//! `FrameSource` owns the capture session. It is responsible for:
//! - Checking capture authorization
//! - Selecting a color + depth capable device
//! - Attaching the input and both outputs inside one configuration transaction
//! - Swapping the input in place when the preferred device changes
//!
//! `FrameSource` is not internally synchronized. The fusion coordinator keeps
//! it behind its session-configuration lock, so start/stop/swap never
//! interleave.

use std::thread::ThreadId;

use crate::error::{OutputKind, SetupError};

use super::session::{
    Authorization, CaptureSession, CaptureSettings, ColorSink, DepthSink, DeviceInfo,
};

pub struct FrameSource {
    session: Box<dyn CaptureSession>,
    settings: CaptureSettings,
    active_device: Option<DeviceInfo>,
    running: bool,
}

impl FrameSource {
    pub fn new(session: Box<dyn CaptureSession>, settings: CaptureSettings) -> Self {
        Self {
            session,
            settings,
            active_device: None,
            running: false,
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Threads currently delivering samples.
    pub fn delivery_threads(&self) -> Vec<ThreadId> {
        self.session.delivery_threads()
    }

    pub fn active_device(&self) -> Option<&DeviceInfo> {
        self.active_device.as_ref()
    }

    /// Device that should be used right now.
    ///
    /// An enumerated device that is available (connected, not suspended) and
    /// depth capable wins over the session's default device. The default is
    /// only used when it qualifies itself.
    pub fn preferred_device(&self) -> Option<DeviceInfo> {
        self.session
            .devices()
            .into_iter()
            .find(|d| d.is_available() && d.qualifies())
            .or_else(|| {
                self.session
                    .default_device()
                    .filter(|d| d.qualifies() && d.is_available())
            })
    }

    /// Configure the session and start delivering samples to the sinks.
    ///
    /// Starting an already running source is a no-op.
    pub fn start(&mut self, color: ColorSink, depth: DepthSink) -> Result<DeviceInfo, SetupError> {
        if self.running {
            if let Some(device) = &self.active_device {
                return Ok(device.clone());
            }
        }

        self.check_authorization()?;
        let device = self.preferred_device().ok_or(SetupError::DeviceUnavailable)?;
        log::info!("FrameSource: using capture device {} ({})", device.name, device.id);

        self.session.begin_configuration();
        let configured = self.configure_session(&device, color, depth);
        self.session.commit_configuration();
        if let Err(err) = configured {
            self.teardown();
            return Err(err);
        }

        if let Err(err) = self.session.start_running() {
            self.teardown();
            return Err(SetupError::ConfigurationFailed(format!("{:#}", err)));
        }

        self.active_device = Some(device.clone());
        self.running = true;
        Ok(device)
    }

    fn check_authorization(&mut self) -> Result<(), SetupError> {
        match self.session.authorization() {
            Authorization::Authorized => Ok(()),
            Authorization::NotDetermined => {
                log::debug!("FrameSource: capture access not determined, requesting");
                if self.session.request_access() {
                    Ok(())
                } else {
                    Err(SetupError::PermissionDenied)
                }
            }
            Authorization::Denied => Err(SetupError::PermissionDenied),
        }
    }

    fn configure_session(
        &mut self,
        device: &DeviceInfo,
        color: ColorSink,
        depth: DepthSink,
    ) -> Result<(), SetupError> {
        self.session
            .attach_input(device)
            .map_err(|e| SetupError::InputAttachFailed(format!("{:#}", e)))?;
        self.session
            .configure(&self.settings)
            .map_err(|e| SetupError::ConfigurationFailed(format!("{:#}", e)))?;
        self.session
            .attach_color_output(color)
            .map_err(|e| SetupError::OutputAttachFailed {
                output: OutputKind::Color,
                reason: format!("{:#}", e),
            })?;
        self.session
            .attach_depth_output(depth)
            .map_err(|e| SetupError::OutputAttachFailed {
                output: OutputKind::Depth,
                reason: format!("{:#}", e),
            })?;
        Ok(())
    }

    fn teardown(&mut self) {
        self.session.begin_configuration();
        self.session.detach_outputs();
        self.session.detach_input();
        self.session.commit_configuration();
        self.active_device = None;
        self.running = false;
    }

    /// Stop the session and release input/outputs. Idempotent.
    ///
    /// Blocks until the session reports that no callback is executing.
    pub fn stop(&mut self) {
        if !self.running && !self.session.is_running() {
            return;
        }
        self.session.stop_running();
        self.teardown();
        log::info!("FrameSource: stopped");
    }

    /// Replace the input device without restarting the session.
    ///
    /// On failure the previous device is re-attached when possible.
    pub fn swap_device(&mut self, device: &DeviceInfo) -> Result<(), SetupError> {
        if !device.qualifies() {
            return Err(SetupError::DeviceUnavailable);
        }
        if !self.running {
            return Err(SetupError::ConfigurationFailed(
                "cannot swap input on a stopped session".into(),
            ));
        }
        if self.active_device.as_ref() == Some(device) {
            return Ok(());
        }

        self.session.begin_configuration();
        self.session.detach_input();
        let result = self.session.attach_input(device);
        if let Err(err) = result {
            if let Some(previous) = &self.active_device {
                if let Err(restore) = self.session.attach_input(previous) {
                    log::error!("FrameSource: failed to restore previous input: {:#}", restore);
                }
            }
            self.session.commit_configuration();
            return Err(SetupError::InputAttachFailed(format!("{:#}", err)));
        }
        self.session.commit_configuration();

        log::info!("FrameSource: swapped input to {} ({})", device.name, device.id);
        self.active_device = Some(device.clone());
        Ok(())
    }

    /// Re-enumerate devices and swap to the preferred one if it changed.
    ///
    /// Returns the new device when a swap happened.
    pub fn refresh_device(&mut self) -> Result<Option<DeviceInfo>, SetupError> {
        if !self.running {
            return Ok(None);
        }
        let preferred = self.preferred_device().ok_or(SetupError::DeviceUnavailable)?;
        let current_id = self.active_device.as_ref().map(|d| d.id.as_str());
        if current_id == Some(preferred.id.as_str()) {
            return Ok(None);
        }
        self.swap_device(&preferred)?;
        Ok(Some(preferred))
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
