//! Register frame built by the trap entry code.

use crate::process::SavedContext;

/// Mode bits of a program status register.
pub const MODE_MASK: u32 = 0x1F;
pub const USER_MODE: u32 = 0x10;
/// IRQ mask bit of a program status register.
pub const IRQ_DISABLE: u32 = 1 << 7;

/// Saved processor state on the trap mode's stack.
///
/// The layout matches what `trap_entry.S` pushes: the banked user registers
/// and SPSR (plus one word keeping the stack 8-byte aligned) below r0-r12
/// and the trap mode's link register.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub sp_user: u32,
    pub lr_user: u32,
    pub spsr: u32,
    pub reserved: u32,
    pub r: [u32; 13],
    /// Link register of the trap mode.
    pub return_address: u32,
}

impl TrapFrame {
    pub fn syscall_number(&self) -> u32 {
        self.r[0]
    }

    pub fn arg1(&self) -> u32 {
        self.r[1]
    }

    pub fn arg2(&self) -> u32 {
        self.r[2]
    }

    pub fn arg3(&self) -> u32 {
        self.r[3]
    }

    /// Whether the trap interrupted user-mode code.
    pub fn is_from_user(&self) -> bool {
        self.spsr & MODE_MASK == USER_MODE
    }

    /// Capture this frame as a saved context.
    ///
    /// `adjustment` is subtracted from the trap link register to get the
    /// address execution resumes at.
    pub fn to_context(&self, adjustment: u32) -> SavedContext {
        SavedContext {
            registers: self.r,
            user_return_address: self.lr_user,
            supervisor_return_address: self.return_address.wrapping_sub(adjustment),
            stack_pointer: self.sp_user,
            status_register: self.spsr,
        }
    }

    /// Load a saved context, so returning from the trap resumes it.
    pub fn load_context(&mut self, context: &SavedContext) {
        self.r = context.registers;
        self.lr_user = context.user_return_address;
        self.return_address = context.supervisor_return_address;
        self.sp_user = context.stack_pointer;
        self.spsr = context.status_register;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_matches_entry_code() {
        assert_eq!(core::mem::size_of::<TrapFrame>(), 18 * 4);
        assert_eq!(core::mem::offset_of!(TrapFrame, spsr), 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, r), 16);
        assert_eq!(core::mem::offset_of!(TrapFrame, return_address), 68);
    }

    #[test]
    fn test_context_round_trip_with_adjustment() {
        let mut frame = TrapFrame {
            sp_user: 0x1FFF_FF00,
            lr_user: 0x8100,
            spsr: 0x150,
            r: [7; 13],
            return_address: 0x9004,
            ..TrapFrame::default()
        };
        let context = frame.to_context(4);
        assert_eq!(context.supervisor_return_address, 0x9000);
        assert!(frame.is_from_user());

        frame = TrapFrame::default();
        frame.load_context(&context);
        assert_eq!(frame.return_address, 0x9000);
        assert_eq!(frame.sp_user, 0x1FFF_FF00);
        assert_eq!(frame.r, [7; 13]);
    }
}
