use std::{
    io::{Read, Write},
    sync::{atomic::AtomicBool, Arc},
    thread::JoinHandle,
};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use common::{atomic::EasyAtomic, Point, PositionMapper};
use parking_lot::Mutex;
use transport::{ControlMessage, ControlMessageReader, CopyKey, DeviceMessage, DeviceMessageWriter};

use crate::{
    capture::CaptureReset,
    lifecycle::{self, AsyncProcessor, ProcessorError, TerminationListener},
};

/// Device side effects of the control messages.
///
/// Every action defaults to a no-op, so that a platform only implements what
/// it supports. Actions returning `bool` report whether they succeeded.
#[allow(unused_variables)]
pub trait InputInjector: Send + 'static {
    fn inject_keycode(&mut self, action: u8, keycode: i32, repeat: i32, metastate: i32) -> bool {
        false
    }

    fn inject_text(&mut self, text: &str) -> bool {
        false
    }

    /// `point` is in device screen coordinates.
    fn inject_touch(
        &mut self,
        action: u8,
        pointer_id: i64,
        point: Point,
        pressure: f32,
        action_button: i32,
        buttons: i32,
    ) -> bool {
        false
    }

    fn inject_scroll(&mut self, point: Point, hscroll: f32, vscroll: f32, buttons: i32) -> bool {
        false
    }

    fn back_or_screen_on(&mut self, action: u8) -> bool {
        false
    }

    fn expand_notification_panel(&mut self) {}

    fn expand_settings_panel(&mut self) {}

    fn collapse_panels(&mut self) {}

    /// Current clipboard text, after the copy or cut key was pressed.
    fn get_clipboard(&mut self, copy_key: CopyKey) -> Option<String> {
        None
    }

    fn set_clipboard(&mut self, text: &str, paste: bool) -> bool {
        false
    }

    fn set_display_power(&mut self, on: bool) -> bool {
        false
    }

    fn rotate_device(&mut self) {}

    fn uhid_create(
        &mut self,
        id: u16,
        vendor_id: u16,
        product_id: u16,
        name: &str,
        report_descriptor: &[u8],
    ) -> bool {
        false
    }

    fn uhid_input(&mut self, id: u16, data: &[u8]) -> bool {
        false
    }

    fn uhid_destroy(&mut self, id: u16) {}

    fn open_hard_keyboard_settings(&mut self) {}

    fn start_app(&mut self, name: &str) -> bool {
        false
    }

    /// Restart the video stream, when the controller has no capture reset
    /// of its own.
    fn reset_video(&mut self) {}
}

/// Current mapping from video positions to screen points, replaced by the
/// video capture on every geometry change.
#[derive(Clone, Default)]
pub struct PositionMapperHandle(Arc<ArcSwapOption<PositionMapper>>);

impl PositionMapperHandle {
    pub fn set(&self, mapper: Option<PositionMapper>) {
        self.0.store(mapper.map(Arc::new));
    }

    pub fn get(&self) -> Option<Arc<PositionMapper>> {
        self.0.load_full()
    }
}

/// Sends device messages to the viewer, shared between the controller and
/// the device listeners (clipboard changes, HID output reports).
pub struct DeviceMessageSender<W>(Arc<Mutex<DeviceMessageWriter<W>>>);

impl<W> Clone for DeviceMessageSender<W> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<W: Write> DeviceMessageSender<W> {
    pub fn new(sink: W) -> Self {
        Self(Arc::new(Mutex::new(DeviceMessageWriter::new(sink))))
    }

    pub fn send(&self, message: &DeviceMessage) -> std::io::Result<()> {
        self.0.lock().write(message)
    }

    pub fn uhid_output(&self, id: u16, data: Bytes) -> std::io::Result<()> {
        self.send(&DeviceMessage::UhidOutput { id, data })
    }
}

/// Reads the control stream and applies every message to the device.
///
/// The controller ends when the viewer closes the control socket. `stop`
/// only takes effect after the next read returns, the platform closes the
/// socket to unblock it.
pub struct Controller<R, W, I> {
    parts: Option<(R, I)>,
    sender: DeviceMessageSender<W>,
    mapper: PositionMapperHandle,
    reset: Option<CaptureReset>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<R, W, I> Controller<R, W, I>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    I: InputInjector,
{
    pub fn new(source: R, sink: W, injector: I) -> Self {
        Self {
            sender: DeviceMessageSender::new(sink),
            parts: Some((source, injector)),
            mapper: Default::default(),
            stopped: Default::default(),
            handle: None,
            reset: None,
        }
    }

    /// Restart the video capture on [`ControlMessage::ResetVideo`].
    pub fn with_capture_reset(mut self, reset: CaptureReset) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn position_mapper(&self) -> PositionMapperHandle {
        self.mapper.clone()
    }

    pub fn sender(&self) -> DeviceMessageSender<W> {
        self.sender.clone()
    }
}

impl<R, W, I> AsyncProcessor for Controller<R, W, I>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    I: InputInjector,
{
    fn name(&self) -> &str {
        "control"
    }

    fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError> {
        let (source, injector) = self.parts.take().ok_or(ProcessorError::AlreadyStarted)?;
        let mut dispatcher = Dispatcher {
            sender: self.sender.clone(),
            mapper: self.mapper.clone(),
            reset: self.reset.clone(),
            injector,
        };

        let stopped = self.stopped.clone();
        self.handle = Some(lifecycle::spawn("control", listener, move || {
            dispatcher.run(source, &stopped)
        })?);

        Ok(())
    }

    fn stop(&self) {
        self.stopped.set(true);
    }

    fn join(&mut self) {
        lifecycle::join("control", &mut self.handle);
    }
}

struct Dispatcher<W, I> {
    sender: DeviceMessageSender<W>,
    mapper: PositionMapperHandle,
    reset: Option<CaptureReset>,
    injector: I,
}

impl<W, I> Dispatcher<W, I>
where
    W: Write,
    I: InputInjector,
{
    fn run<R: Read>(&mut self, mut source: R, stopped: &AtomicBool) -> Result<(), ProcessorError> {
        let mut reader = ControlMessageReader::new();

        while !stopped.get() {
            while let Some(message) = reader.next()? {
                self.handle(message)?;
            }

            if !reader.feed(&mut source)? {
                log::info!("control stream closed by the viewer");

                break;
            }
        }

        Ok(())
    }

    fn handle(&mut self, message: ControlMessage) -> Result<(), ProcessorError> {
        log::trace!("control message={:?}", message);

        let done = match message {
            ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => self
                .injector
                .inject_keycode(action, keycode, repeat, metastate),
            ControlMessage::InjectText(text) => self.injector.inject_text(&text),
            ControlMessage::InjectTouchEvent {
                action,
                pointer_id,
                position,
                pressure,
                action_button,
                buttons,
            } => match self.mapper.get().and_then(|it| it.map(&position)) {
                Some(point) => self.injector.inject_touch(
                    action,
                    pointer_id,
                    point,
                    pressure,
                    action_button,
                    buttons,
                ),
                None => {
                    log::debug!("ignore touch event, position={:?}", position);

                    true
                }
            },
            ControlMessage::InjectScrollEvent {
                position,
                hscroll,
                vscroll,
                buttons,
            } => match self.mapper.get().and_then(|it| it.map(&position)) {
                Some(point) => self.injector.inject_scroll(point, hscroll, vscroll, buttons),
                None => {
                    log::debug!("ignore scroll event, position={:?}", position);

                    true
                }
            },
            ControlMessage::BackOrScreenOn { action } => self.injector.back_or_screen_on(action),
            ControlMessage::ExpandNotificationPanel => {
                self.injector.expand_notification_panel();
                true
            }
            ControlMessage::ExpandSettingsPanel => {
                self.injector.expand_settings_panel();
                true
            }
            ControlMessage::CollapsePanels => {
                self.injector.collapse_panels();
                true
            }
            ControlMessage::GetClipboard { copy_key } => {
                if let Some(text) = self.injector.get_clipboard(copy_key) {
                    self.sender.send(&DeviceMessage::Clipboard(text))?;
                }

                true
            }
            ControlMessage::SetClipboard {
                sequence,
                text,
                paste,
            } => {
                let done = self.injector.set_clipboard(&text, paste);
                if sequence != 0 {
                    self.sender.send(&DeviceMessage::AckClipboard(sequence))?;
                }

                done
            }
            ControlMessage::SetDisplayPower { on } => self.injector.set_display_power(on),
            ControlMessage::RotateDevice => {
                self.injector.rotate_device();
                true
            }
            ControlMessage::UhidCreate {
                id,
                vendor_id,
                product_id,
                name,
                report_descriptor,
            } => self
                .injector
                .uhid_create(id, vendor_id, product_id, &name, &report_descriptor),
            ControlMessage::UhidInput { id, data } => self.injector.uhid_input(id, &data),
            ControlMessage::UhidDestroy { id } => {
                self.injector.uhid_destroy(id);
                true
            }
            ControlMessage::OpenHardKeyboardSettings => {
                self.injector.open_hard_keyboard_settings();
                true
            }
            ControlMessage::StartApp { name } => self.injector.start_app(&name),
            ControlMessage::ResetVideo => {
                match &self.reset {
                    Some(reset) => reset.reset(),
                    None => self.injector.reset_video(),
                }

                true
            }
        };

        if !done {
            log::warn!("control message could not be applied");
        }

        Ok(())
    }
}
