//! PVCAM SDK backend.
//!
//! Thin `CameraSdk` implementation over the `pvcam-sys` bindings. Only built with the
//! `pvcam_hardware` feature.
//!
//! ## SDK reference counting
//!
//! `pl_pvcam_init()` / `pl_pvcam_uninit()` act on process-global state. Each
//! `PvcamSdk` holds one reference; the SDK is uninitialized when the last one drops.
//!
//! ## Callback trampoline
//!
//! PVCAM hands the EOF callback its own `FRAME_INFO` layout. We register
//! [`pvcam_eof_trampoline`] with a boxed [`Trampoline`] as context; it converts the
//! frame info to [`FrameInfo`] and forwards to the caller's callback with the caller's
//! context. The box lives until the callback is deregistered.

#![allow(unsafe_code)]

use super::{
    BufferPolicy, CameraHandle, CameraSdk, EofCallback, ExposureMode, FrameInfo, LatestFrame,
    NegotiatedMode, Region,
};
use crate::error::SdkError;
use pvcam_sys::*;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Global reference counter for SDK initialization.
static SDK_REF_COUNT: AtomicU32 = AtomicU32::new(0);

/// Makes increment + init and decrement + uninit atomic.
static SDK_INIT_MUTEX: Mutex<()> = Mutex::new(());

/// PVCAM's documented maximum error message length.
const ERROR_MSG_LEN: usize = 256;
/// Buffer size for camera names.
const CAM_NAME_BUF_LEN: usize = 256;

/// Error code and message of the most recent failing PVCAM call.
fn pvcam_error() -> SdkError {
    let mut msg = [0 as c_char; ERROR_MSG_LEN];
    // SAFETY: error queries are thread-safe once the SDK is initialized; msg is
    // writable and sized per SDK requirement.
    let code = unsafe {
        let code = pl_error_code();
        pl_error_message(code, msg.as_mut_ptr());
        code
    };
    // SAFETY: pl_error_message writes a NUL-terminated string into msg.
    let message = unsafe { CStr::from_ptr(msg.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    SdkError::new(i32::from(code), message)
}

fn check(ok: rs_bool) -> Result<(), SdkError> {
    if ok == 0 {
        Err(pvcam_error())
    } else {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("PVCAM mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

/// The caller's callback and context, reachable from the trampoline.
struct Trampoline {
    callback: EofCallback,
    context: *mut c_void,
}

// SAFETY: the context pointer is only dereferenced by the caller's callback, whose
// registration contract requires it to be usable from any thread.
unsafe impl Send for Trampoline {}

fn to_frame_info(info: &FRAME_INFO) -> FrameInfo {
    FrameInfo {
        camera: info.hCam,
        frame_nr: info.FrameNr,
        timestamp: info.TimeStamp,
        readout_time: info.ReadoutTime,
        timestamp_bof: info.TimeStampBOF,
    }
}

/// EOF callback registered with PVCAM. Runs on the SDK's notification thread.
extern "system" fn pvcam_eof_trampoline(frame_info: *const FRAME_INFO, context: *mut c_void) {
    if context.is_null() {
        return;
    }
    // SAFETY: context is the boxed Trampoline passed at registration, kept alive
    // until pl_cam_deregister_callback has returned.
    let trampoline = unsafe { &*(context as *const Trampoline) };

    let converted;
    let info_ptr: *const FrameInfo = if frame_info.is_null() {
        ptr::null()
    } else {
        // SAFETY: PVCAM passes a valid FRAME_INFO for the duration of the call.
        converted = to_frame_info(unsafe { &*frame_info });
        &converted
    };

    // SAFETY: forwarded under the same contract the caller registered with.
    unsafe { (trampoline.callback)(info_ptr, trampoline.context) };
}

/// PVCAM SDK handle. Initializes the SDK on creation and releases it on drop.
pub struct PvcamSdk {
    trampolines: Mutex<HashMap<i16, Box<Trampoline>>>,
}

impl PvcamSdk {
    /// Initialize the SDK (or take another reference to it).
    pub fn init() -> Result<Self, SdkError> {
        let _guard = lock(&SDK_INIT_MUTEX);

        let prev_count = SDK_REF_COUNT.fetch_add(1, Ordering::SeqCst);
        if prev_count == 0 {
            // SAFETY: global PVCAM init, serialized by SDK_INIT_MUTEX.
            if unsafe { pl_pvcam_init() } == 0 {
                SDK_REF_COUNT.fetch_sub(1, Ordering::SeqCst);
                let err = pvcam_error();
                tracing::error!(error = %err, "Failed to initialize PVCAM SDK");
                return Err(err);
            }
            tracing::info!("PVCAM SDK initialized (ref count: 1)");
        } else {
            tracing::debug!(ref_count = prev_count + 1, "PVCAM SDK already initialized");
        }

        Ok(Self {
            trampolines: Mutex::new(HashMap::new()),
        })
    }
}

impl Drop for PvcamSdk {
    fn drop(&mut self) {
        let _guard = lock(&SDK_INIT_MUTEX);
        let prev_count = SDK_REF_COUNT.fetch_sub(1, Ordering::SeqCst);
        if prev_count == 1 {
            // SAFETY: last reference; serialized by SDK_INIT_MUTEX.
            unsafe {
                pl_pvcam_uninit();
            }
            tracing::info!("PVCAM SDK uninitialized");
        }
    }
}

impl CameraSdk for PvcamSdk {
    fn enumerate_cameras(&self) -> Result<Vec<String>, SdkError> {
        let mut total: i16 = 0;
        // SAFETY: total is a valid out pointer; SDK is initialized.
        check(unsafe { pl_cam_get_total(&mut total) })?;

        let mut names = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        for index in 0..total {
            let mut name = [0 as c_char; CAM_NAME_BUF_LEN];
            // SAFETY: name is writable and larger than CAM_NAME_LEN.
            check(unsafe { pl_cam_get_name(index, name.as_mut_ptr()) })?;
            // SAFETY: pl_cam_get_name writes a NUL-terminated string.
            let name = unsafe { CStr::from_ptr(name.as_ptr()) };
            names.push(name.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn open(&self, name: &str) -> Result<CameraHandle, SdkError> {
        let c_name = CString::new(name)
            .map_err(|_| SdkError::new(-1, format!("Invalid camera name '{name}'")))?;
        let mut hcam: i16 = 0;
        // SAFETY: c_name is a valid C string; hcam is a valid out pointer. PVCAM takes
        // the name as non-const but does not write to it.
        check(unsafe { pl_cam_open(c_name.as_ptr() as *mut c_char, &mut hcam, 0) })?;
        tracing::info!(camera = name, handle = hcam, "PVCAM camera opened");
        Ok(CameraHandle(hcam))
    }

    fn close(&self, handle: CameraHandle) -> Result<(), SdkError> {
        // SAFETY: handle came from pl_cam_open.
        check(unsafe { pl_cam_close(handle.0) })
    }

    fn select_exposure_mode(
        &self,
        handle: CameraHandle,
        mode: ExposureMode,
    ) -> Result<NegotiatedMode, SdkError> {
        if let Some(raw) = mode.raw_value() {
            return Ok(NegotiatedMode { requested: mode, raw });
        }

        // The camera's default mode is the one Prime-series firmware accepts with
        // CIRC_OVERWRITE.
        let mut value: i32 = 0;
        // SAFETY: value is a writable i32, the size of an enum parameter.
        check(unsafe {
            pl_get_param(
                handle.0,
                PARAM_EXPOSURE_MODE,
                ATTR_DEFAULT as i16,
                &mut value as *mut i32 as *mut c_void,
            )
        })?;
        let raw = i16::try_from(value)
            .map_err(|_| SdkError::new(-1, format!("Exposure mode {value} out of range")))?;
        Ok(NegotiatedMode { requested: mode, raw })
    }

    fn setup_continuous(
        &self,
        handle: CameraHandle,
        region: &Region,
        mode: NegotiatedMode,
        exposure_ms: u32,
        policy: BufferPolicy,
    ) -> Result<usize, SdkError> {
        let rgn = rgn_type {
            s1: region.s1,
            s2: region.s2,
            sbin: region.sbin,
            p1: region.p1,
            p2: region.p2,
            pbin: region.pbin,
        };
        let buffer_mode = match policy {
            BufferPolicy::Overwrite => CIRC_OVERWRITE as i16,
            BufferPolicy::NoOverwrite => CIRC_NO_OVERWRITE as i16,
        };
        let mut frame_bytes: uns32 = 0;
        // SAFETY: rgn and frame_bytes are valid for the call; one region.
        check(unsafe {
            pl_exp_setup_cont(
                handle.0,
                1,
                &rgn,
                mode.raw,
                exposure_ms,
                &mut frame_bytes,
                buffer_mode,
            )
        })?;
        usize::try_from(frame_bytes)
            .map_err(|_| SdkError::new(-1, format!("Frame size {frame_bytes} out of range")))
    }

    unsafe fn register_eof_callback(
        &self,
        handle: CameraHandle,
        callback: EofCallback,
        context: *mut c_void,
    ) -> Result<(), SdkError> {
        let trampoline = Box::new(Trampoline { callback, context });
        let trampoline_ptr = &*trampoline as *const Trampoline as *mut c_void;

        // Stored before registering so it outlives the first notification.
        let mut trampolines = lock(&self.trampolines);
        trampolines.insert(handle.0, trampoline);

        // SAFETY: the trampoline box stays in `trampolines` until deregistration.
        let ok = unsafe {
            pl_cam_register_callback_ex3(
                handle.0,
                PL_CALLBACK_EOF as i32,
                pvcam_eof_trampoline as *mut c_void,
                trampoline_ptr,
            )
        };
        if ok == 0 {
            trampolines.remove(&handle.0);
            return Err(pvcam_error());
        }
        Ok(())
    }

    fn deregister_eof_callback(&self, handle: CameraHandle) -> Result<(), SdkError> {
        // SAFETY: handle came from pl_cam_open.
        let result = check(unsafe { pl_cam_deregister_callback(handle.0, PL_CALLBACK_EOF as i32) });
        // Dropped only after PVCAM has stopped calling it.
        lock(&self.trampolines).remove(&handle.0);
        result
    }

    unsafe fn start_continuous(
        &self,
        handle: CameraHandle,
        buffer: *mut u8,
        len: usize,
    ) -> Result<(), SdkError> {
        let size = uns32::try_from(len)
            .map_err(|_| SdkError::new(-1, format!("Buffer of {len} bytes too large for PVCAM")))?;
        // SAFETY: caller guarantees buffer is valid for len bytes until abort.
        check(unsafe { pl_exp_start_cont(handle.0, buffer as *mut c_void, size) })
    }

    fn abort(&self, handle: CameraHandle) -> Result<(), SdkError> {
        // SAFETY: pl_exp_abort is valid in any acquisition state.
        check(unsafe { pl_exp_abort(handle.0, CCS_HALT as i16) })
    }

    fn fetch_latest_frame(&self, handle: CameraHandle) -> Result<LatestFrame, SdkError> {
        let mut address: *mut c_void = ptr::null_mut();
        // SAFETY: FRAME_INFO is plain data; zeroed is a valid initial value.
        let mut info: FRAME_INFO = unsafe { std::mem::zeroed() };
        // SAFETY: both out pointers are valid for the call.
        check(unsafe { pl_exp_get_latest_frame_ex(handle.0, &mut address, &mut info) })?;
        if address.is_null() {
            return Err(SdkError::new(-1, "Latest frame address is null"));
        }
        Ok(LatestFrame {
            address: address as usize,
            info: to_frame_info(&info),
        })
    }

    fn last_error(&self) -> SdkError {
        pvcam_error()
    }
}
