//! Call-frame codec.
//!
//! A [`Frame`] is the buffer handed to a native function pointer: a
//! contiguous array of fixed-width argument slots in declared parameter order,
//! plus one separate return slot. Slots are 16 bytes and 16-byte aligned,
//! wide enough for every primitive and small vector the host passes by value.
//!
//! The frame carries no runtime type tags. The types written with
//! [`Frame::put_arg`] must match the native signature exactly; that agreement
//! is established by the call site, not checked here.

use std::fmt;
use std::marker::PhantomData;

use glam::{IVec2, IVec3, IVec4, Quat, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::contract;
use crate::error::HandleError;
use crate::handle::{HandleRegistry, Ownership, RawHandle, Token};
use crate::string_name::{StrRef, StringName};
use crate::variant::{Color, Rid};

/// Frames with up to this many arguments do not allocate.
pub const INLINE_SLOTS: usize = 8;

/// One argument or return slot.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(16))]
pub struct FrameSlot {
    bytes: [u8; FrameSlot::SIZE],
}

impl FrameSlot {
    pub const SIZE: usize = 16;
    pub const ZERO: FrameSlot = FrameSlot {
        bytes: [0; FrameSlot::SIZE],
    };

    pub fn bytes(&self) -> &[u8; FrameSlot::SIZE] {
        &self.bytes
    }

    /// Store a value using its frame encoding, clearing the rest of the slot.
    pub fn store<T: FrameValue>(&mut self, value: T) {
        *self = FrameSlot::ZERO;
        value.encode(self);
    }

    pub fn load<T: FrameValue>(&self) -> T {
        T::decode(self)
    }

    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        out
    }
}

impl fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameSlot(")?;
        for byte in &self.bytes {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// A type with a fixed by-value encoding in a frame slot.
///
/// # Safety
///
/// `encode` must produce exactly the bit width and layout the native side
/// expects, and `decode` must yield a valid value for *any* slot contents,
/// since frames carry no type tags.
pub unsafe trait FrameValue: Sized {
    /// Type name used in diagnostics.
    const NAME: &'static str;

    fn encode(self, slot: &mut FrameSlot);
    fn decode(slot: &FrameSlot) -> Self;
}

macro_rules! impl_frame_scalar {
    ($($t:ty => $name:literal),* $(,)?) => {
        $(
            // SAFETY: every bit pattern of the slot prefix is a valid $t.
            unsafe impl FrameValue for $t {
                const NAME: &'static str = $name;

                fn encode(self, slot: &mut FrameSlot) {
                    slot.write_bytes(0, &self.to_ne_bytes());
                }

                fn decode(slot: &FrameSlot) -> Self {
                    <$t>::from_ne_bytes(slot.read_array(0))
                }
            }
        )*
    };
}

impl_frame_scalar!(
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
);

macro_rules! impl_frame_lanes {
    ($($t:ty, $lane:ty, $n:literal => $name:literal;)*) => {
        $(
            // SAFETY: lanes are plain numbers; any bits decode.
            unsafe impl FrameValue for $t {
                const NAME: &'static str = $name;

                fn encode(self, slot: &mut FrameSlot) {
                    for (i, lane) in self.to_array().into_iter().enumerate() {
                        slot.write_bytes(i * 4, &lane.to_ne_bytes());
                    }
                }

                fn decode(slot: &FrameSlot) -> Self {
                    let mut lanes = [<$lane>::default(); $n];
                    for (i, lane) in lanes.iter_mut().enumerate() {
                        *lane = <$lane>::from_ne_bytes(slot.read_array(i * 4));
                    }
                    <$t>::from_array(lanes)
                }
            }
        )*
    };
}

impl_frame_lanes! {
    Vec2, f32, 2 => "Vector2";
    IVec2, i32, 2 => "Vector2i";
    Vec3, f32, 3 => "Vector3";
    IVec3, i32, 3 => "Vector3i";
    Vec4, f32, 4 => "Vector4";
    IVec4, i32, 4 => "Vector4i";
    Quat, f32, 4 => "Quaternion";
    Color, f32, 4 => "Color";
}

// SAFETY: a single byte; any non-zero value is true.
unsafe impl FrameValue for bool {
    const NAME: &'static str = "bool";

    fn encode(self, slot: &mut FrameSlot) {
        slot.write_bytes(0, &[self as u8]);
    }

    fn decode(slot: &FrameSlot) -> Self {
        slot.bytes[0] != 0
    }
}

// SAFETY: handles are plain 64-bit values; validity is the registry's job.
unsafe impl FrameValue for RawHandle {
    const NAME: &'static str = "Object";

    fn encode(self, slot: &mut FrameSlot) {
        self.to_bits().encode(slot);
    }

    fn decode(slot: &FrameSlot) -> Self {
        RawHandle::from_bits(u64::decode(slot))
    }
}

// SAFETY: resource ids are plain 64-bit values.
unsafe impl FrameValue for Rid {
    const NAME: &'static str = "RID";

    fn encode(self, slot: &mut FrameSlot) {
        self.0.encode(slot);
    }

    fn decode(slot: &FrameSlot) -> Self {
        Rid(u64::decode(slot))
    }
}

/// Signature of a native function invoked through a frame.
pub type NativeCall = unsafe extern "C" fn(args: *const FrameSlot, ret: *mut FrameSlot);

/// Argument and return buffer for one native call.
///
/// `'a` bounds any borrowed strings written into the frame.
pub struct Frame<'a> {
    args: SmallVec<[FrameSlot; INLINE_SLOTS]>,
    ret: FrameSlot,
    _strings: PhantomData<&'a str>,
}

impl<'a> Frame<'a> {
    /// Allocate a frame for exactly `argc` arguments plus the return slot.
    pub fn new(argc: usize) -> Self {
        Self {
            args: SmallVec::from_elem(FrameSlot::ZERO, argc),
            ret: FrameSlot::ZERO,
            _strings: PhantomData,
        }
    }

    /// Copy a host-provided argument array into a new frame.
    ///
    /// # Safety
    ///
    /// `args` must point to `argc` readable slots (or be null with `argc == 0`),
    /// and any strings referenced by those slots must stay valid for `'a`.
    pub unsafe fn from_raw(args: *const FrameSlot, argc: usize) -> Self {
        let mut frame = Frame::new(0);
        if argc > 0 && !args.is_null() {
            // SAFETY: guaranteed by the caller.
            let slots = unsafe { std::slice::from_raw_parts(args, argc) };
            frame.args.extend_from_slice(slots);
        }
        frame
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Write `value` into argument slot `index`.
    ///
    /// Writing outside the frame is a contract violation.
    pub fn put_arg<T: FrameValue>(&mut self, index: usize, value: T) -> &mut Self {
        self.slot_mut(index).store(value);
        self
    }

    /// Write a borrowed string as `{ptr, len}`.
    pub fn put_str(&mut self, index: usize, text: StrRef<'a>) -> &mut Self {
        let slot = self.slot_mut(index);
        *slot = FrameSlot::ZERO;
        slot.write_bytes(0, &(text.as_ptr() as usize).to_ne_bytes());
        slot.write_bytes(8, &text.len().to_ne_bytes());
        self
    }

    /// Write an interned name as its id.
    pub fn put_name(&mut self, index: usize, name: StringName) -> &mut Self {
        self.put_arg(index, name.id())
    }

    /// Resolve a registry token and write its raw handle.
    ///
    /// A released or unknown token is reported instead of writing a stale
    /// pointer.
    pub fn put_object(
        &mut self,
        index: usize,
        registry: &HandleRegistry,
        token: Token,
    ) -> Result<&mut Self, HandleError> {
        let raw = registry.raw(token)?;
        Ok(self.put_arg(index, raw))
    }

    /// Write a null object argument.
    pub fn put_null(&mut self, index: usize) -> &mut Self {
        self.put_arg(index, RawHandle::NULL)
    }

    /// Decode argument `index` as `T`.
    pub fn arg<T: FrameValue>(&self, index: usize) -> T {
        self.slot(index).load()
    }

    /// Decode argument `index` as a borrowed string.
    ///
    /// # Safety
    ///
    /// The slot must hold a string written by [`put_str`](Self::put_str) or by
    /// native code following the same layout, still alive for `'a`.
    pub unsafe fn str_arg(&self, index: usize) -> StrRef<'a> {
        let slot = self.slot(index);
        let ptr = usize::from_ne_bytes(slot.read_array(0)) as *const u8;
        let len = usize::from_ne_bytes(slot.read_array(8));
        // SAFETY: guaranteed by the caller.
        unsafe { StrRef::from_raw_parts(ptr, len) }
    }

    /// Call `call` with this frame's argument and return slots.
    ///
    /// The return slot is cleared first, so after the call it holds exactly
    /// what the native function wrote.
    ///
    /// # Safety
    ///
    /// `call` must be a valid function whose parameter list matches the
    /// frame's argument slots in count, order and encoding.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn invoke(&mut self, call: NativeCall) -> &mut Self {
        self.ret = FrameSlot::ZERO;
        tracing::trace!(argc = self.args.len(), "invoking native function");
        // SAFETY: guaranteed by the caller.
        unsafe { call(self.args_ptr(), self.ret_ptr()) };
        self
    }

    /// Decode the return slot as `T`.
    pub fn ret<T: FrameValue>(&self) -> T {
        self.ret.load()
    }

    /// Write the return slot (used by trampolines answering the host).
    pub fn set_ret<T: FrameValue>(&mut self, value: T) {
        self.ret.store(value);
    }

    /// Decode an object return and register it immediately.
    ///
    /// A null return yields `Ok(None)`. Any other handle is acquired with the
    /// given ownership before this returns, so its lifetime is tracked from
    /// the moment it crossed the boundary.
    pub fn ret_object(
        &self,
        registry: &HandleRegistry,
        ownership: Ownership,
        class: Option<StringName>,
    ) -> Result<Option<Token>, HandleError> {
        let raw: RawHandle = self.ret();
        if raw.is_null() {
            return Ok(None);
        }
        let token = match class {
            Some(class) => registry.acquire_typed(raw, ownership, class)?,
            None => registry.acquire(raw, ownership)?,
        };
        Ok(Some(token))
    }

    pub fn ret_slot(&self) -> &FrameSlot {
        &self.ret
    }

    pub fn args(&self) -> &[FrameSlot] {
        &self.args
    }

    pub fn args_ptr(&self) -> *const FrameSlot {
        if self.args.is_empty() {
            std::ptr::null()
        } else {
            self.args.as_ptr()
        }
    }

    pub fn ret_ptr(&mut self) -> *mut FrameSlot {
        &mut self.ret
    }

    fn slot(&self, index: usize) -> &FrameSlot {
        match self.args.get(index) {
            Some(slot) => slot,
            None => contract::violation(format_args!(
                "frame slot {index} out of range for a frame of {} arguments",
                self.args.len()
            )),
        }
    }

    fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        let argc = self.args.len();
        match self.args.get_mut(index) {
            Some(slot) => slot,
            None => contract::violation(format_args!(
                "frame slot {index} out of range for a frame of {argc} arguments"
            )),
        }
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("argc", &self.args.len())
            .field("ret", &self.ret)
            .finish()
    }
}
