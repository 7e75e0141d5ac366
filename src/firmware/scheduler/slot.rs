use crate::firmware::registers::RegisterFile;

/// Per-tick view handed to a slot: the register window and the interrupt
/// accumulator, which only ever gains bits during a tick.
pub struct TickContext<'a, R: RegisterFile + ?Sized> {
    regs: &'a mut R,
    int_status: &'a mut u32,
    slot: usize,
}

impl<'a, R: RegisterFile + ?Sized> TickContext<'a, R> {
    pub fn new(regs: &'a mut R, int_status: &'a mut u32, slot: usize) -> Self {
        Self {
            regs,
            int_status,
            slot,
        }
    }

    pub fn regs(&mut self) -> &mut R {
        self.regs
    }

    pub fn raise(&mut self, flags: u32) {
        *self.int_status |= flags;
    }

    pub fn int_status(&self) -> u32 {
        *self.int_status
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// One algorithm image bound to a scheduler slot.
pub trait AlgoSlot {
    /// Called once, on the first tick the slot is enabled.
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, regs: &mut R);
    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>);
}

/// Statically dispatched group of slots; slot `n` answers `ALGO` bit `n`.
pub trait SlotSet {
    const LEN: usize;

    fn configure<R: RegisterFile + ?Sized>(&mut self, index: usize, regs: &mut R);
    fn tick<R: RegisterFile + ?Sized>(&mut self, index: usize, ctx: &mut TickContext<'_, R>);
}

macro_rules! impl_slot_set {
    ($len:expr; $($idx:tt => $slot:ident),+) => {
        impl<$($slot: AlgoSlot),+> SlotSet for ($($slot,)+) {
            const LEN: usize = $len;

            fn configure<R: RegisterFile + ?Sized>(&mut self, index: usize, regs: &mut R) {
                match index {
                    $($idx => self.$idx.on_configure(regs),)+
                    _ => {}
                }
            }

            fn tick<R: RegisterFile + ?Sized>(
                &mut self,
                index: usize,
                ctx: &mut TickContext<'_, R>,
            ) {
                match index {
                    $($idx => self.$idx.on_tick(ctx),)+
                    _ => {}
                }
            }
        }
    };
}

impl_slot_set!(1; 0 => A);
impl_slot_set!(2; 0 => A, 1 => B);
impl_slot_set!(3; 0 => A, 1 => B, 2 => C);
impl_slot_set!(4; 0 => A, 1 => B, 2 => C, 3 => D);
