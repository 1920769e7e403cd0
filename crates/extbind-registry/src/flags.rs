use bitflags::bitflags;

bitflags! {
    /// Flags recorded on every registered method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        const NORMAL = 1 << 0;
        const EDITOR = 1 << 1;
        const CONST = 1 << 2;
        const VIRTUAL = 1 << 3;
        const VARARG = 1 << 4;
        const STATIC = 1 << 5;
    }
}

impl Default for MethodFlags {
    fn default() -> Self {
        MethodFlags::NORMAL | MethodFlags::VIRTUAL
    }
}

bitflags! {
    /// How the host should expose an extension class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        /// Cannot be instantiated; only subclassed.
        const ABSTRACT = 1 << 0;
        /// Visible to the host's editor and scripting layer.
        const EXPOSED = 1 << 1;
        /// Runs in the editor as well as at runtime.
        const TOOL = 1 << 2;
        /// Instances are intrusively reference counted on the host side.
        const REF_COUNTED = 1 << 3;
    }
}

bitflags! {
    /// How the host stores and shows a property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyUsage: u32 {
        /// Saved with the object.
        const STORAGE = 1 << 1;
        /// Shown in the editor's inspector.
        const EDITOR = 1 << 2;
        /// A nil-typed property accepts any variant.
        const NIL_IS_VARIANT = 1 << 17;
        const READ_ONLY = 1 << 28;
    }
}

impl Default for PropertyUsage {
    fn default() -> Self {
        PropertyUsage::STORAGE | PropertyUsage::EDITOR
    }
}
