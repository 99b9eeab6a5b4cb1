//! Plain data types shared across the GPU session layer.

use std::fmt;

use bitflags::bitflags;

/// Native backend an adapter may be requested for.
///
/// The discriminants are stable and used as raw values at the C boundary.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// No preference; the driver picks its default adapter.
    #[default]
    Undefined = 0,
    /// Null backend that performs no GPU work.
    Null = 1,
    WebGpu = 2,
    D3D11 = 3,
    D3D12 = 4,
    Metal = 5,
    Vulkan = 6,
    OpenGl = 7,
    OpenGles = 8,
}

impl BackendType {
    /// Every backend type, in discriminant order.
    pub const ALL: [BackendType; 9] = [
        Self::Undefined,
        Self::Null,
        Self::WebGpu,
        Self::D3D11,
        Self::D3D12,
        Self::Metal,
        Self::Vulkan,
        Self::OpenGl,
        Self::OpenGles,
    ];

    /// Convert a raw boundary value into a backend type.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Get the backend name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::WebGpu => "webgpu",
            Self::D3D11 => "d3d11",
            Self::D3D12 => "d3d12",
            Self::Metal => "metal",
            Self::Vulkan => "vulkan",
            Self::OpenGl => "opengl",
            Self::OpenGles => "opengles",
        }
    }

    /// Whether an adapter running on `other` satisfies a request for `self`.
    pub fn accepts(&self, other: BackendType) -> bool {
        *self == Self::Undefined || *self == other
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// Information about a negotiated adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// Adapter vendor.
    pub vendor: String,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Backend the adapter runs on.
    pub backend: BackendType,
}

bitflags! {
    /// Capabilities requested when the instance is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceFeatures: u32 {
        /// Blocking waits on futures with a finite timeout.
        const TIMED_WAIT_ANY = 1 << 0;
    }
}

bitflags! {
    /// Diagnostic toggles applied to the instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceToggles: u32 {
        /// Expose APIs that are not yet considered safe.
        const ALLOW_UNSAFE_APIS = 1 << 0;
    }
}

bitflags! {
    /// Optional device features.
    ///
    /// Devices are requested with an empty set unless a descriptor asks for more.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFeatures: u32 {
        /// Import of `ID3D11Texture2D` objects as shared texture memory.
        const SHARED_TEXTURE_MEMORY_D3D11_TEXTURE_2D = 1 << 0;
        /// Import of `ID3D12Resource` objects as shared texture memory.
        const SHARED_TEXTURE_MEMORY_D3D12_RESOURCE = 1 << 1;
        /// Fences exchanged through DXGI shared handles.
        const SHARED_FENCE_DXGI_SHARED_HANDLE = 1 << 2;
    }
}

bitflags! {
    /// Texture usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        /// Can be used as a copy source.
        const COPY_SRC = 1 << 0;
        /// Can be used as a copy destination.
        const COPY_DST = 1 << 1;
        /// Can be sampled in shaders.
        const TEXTURE_BINDING = 1 << 2;
        /// Can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Can be used as a render target.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Pixel formats a shared texture may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgb10a2Unorm,
}

/// Description of the texture backing a shared memory import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedTextureProperties {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Allowed usages.
    pub usage: TextureUsage,
}

impl Default for SharedTextureProperties {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            format: TextureFormat::Bgra8Unorm,
            usage: TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::RENDER_ATTACHMENT,
        }
    }
}

/// Kind of blocking request handled by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Adapter,
    Device,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter => f.write_str("adapter"),
            Self::Device => f.write_str("device"),
        }
    }
}

/// Why a device was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceLostReason {
    /// The driver reported an unexpected loss.
    Unknown,
    /// The device was destroyed by its owner.
    Destroyed,
}

/// Pollable device health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Alive,
    Lost,
}

/// Details recorded when a device is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLostInfo {
    pub reason: DeviceLostReason,
    pub message: String,
}

/// Classification of an error the driver could not attribute to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UncapturedErrorKind {
    Validation,
    OutOfMemory,
    Internal,
    Unknown,
}

/// Out-of-band notification delivered to a device event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device was lost. Delivered at most once.
    Lost(DeviceLostInfo),
    /// The driver reported an error outside any call.
    UncapturedError {
        kind: UncapturedErrorKind,
        message: String,
    },
}

/// Monotonic index of a queue submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionIndex(pub u64);
