//! Callback adapter: a port delegate backed by two C function pointers.
//!
//! [`make_adapter`] wraps a [`CallbackTable`] in an `OxPortDelegateAdapter`,
//! a runtime class that adopts the `OxPortDelegate` protocol. When a port
//! delivers an event the adapter calls the matching slot with itself and
//! the event; payloads are passed through untouched.
//!
//! | Slot | Delegate message      | Event argument          |
//! |------|-----------------------|-------------------------|
//! | 0    | `handleMachMessage:`  | raw message pointer     |
//! | 1    | `handlePortMessage:`  | port message object     |
//!
//! The table is copied into the adapter. The adapter does not own the
//! functions; they must stay callable for as long as the adapter lives.
//!
//! Safe code can deliver any pointer to an adapter, through
//! [`PortDelegate::handle_mach_message`] or a port's `post_mach_message`.
//! Installing the callbacks is where that is vouched for, so
//! [`make_adapter`] is `unsafe`.

use crate::bridge::base::{Object, base_symbols};
use crate::bridge::{Id, Retained};
use crate::error::Result;
use crate::runtime::builtins::builtins;
use crate::runtime::dispatch::{arg, receiver, set_return};
use crate::runtime::{Class, Method, Selector};
use crate::{asel, define_obj_type, encode_struct, rsel, wsel};
use oxidex_log::{debug, error, trace};
use std::ffi::c_void;
use std::sync::OnceLock;

/// Runtime name of the adapter class.
pub const ADAPTER_CLASS: &str = "OxPortDelegateAdapter";

/// Receives one event: the adapter that got it and the event itself.
pub type EventCallback = unsafe extern "C" fn(adapter: *mut c_void, event: *mut c_void);

/// Two event slots, passed and stored by value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackTable {
    pub slots: [Option<EventCallback>; 2],
}

encode_struct!(CallbackTable = "OxCallbackTable");

impl CallbackTable {
    /// Slot receiving `handleMachMessage:`.
    pub const MACH_MESSAGE: usize = 0;
    /// Slot receiving `handlePortMessage:`.
    pub const PORT_MESSAGE: usize = 1;

    #[must_use]
    pub const fn new(mach_message: Option<EventCallback>, port_message: Option<EventCallback>) -> Self {
        CallbackTable {
            slots: [mach_message, port_message],
        }
    }
}

static ADAPTER: OnceLock<Class> = OnceLock::new();

/// Registers the adapter class. Idempotent and thread-safe.
///
/// # Panics
///
/// Panics if another class already took the adapter's name.
pub(crate) fn install() -> Class {
    *ADAPTER.get_or_init(|| match register() {
        Ok(class) => class,
        Err(e) => {
            error!("failed to install {ADAPTER_CLASS}: {e}");
            panic!("failed to install {ADAPTER_CLASS}: {e}");
        }
    })
}

fn register() -> Result<Class> {
    let builtins = builtins();
    let class = Class::new(ADAPTER_CLASS, builtins.object)?;
    class.add_method(Method::new(
        Selector::register("initWithCallbacks:"),
        adapter_init,
        "@@:{OxCallbackTable}",
    )?);
    class.add_method(Method::new(
        Selector::register("callbacks"),
        adapter_callbacks,
        "{OxCallbackTable}@:",
    )?);
    class.add_method(Method::new(
        Selector::register("handleMachMessage:"),
        adapter_mach_message,
        "v@:^",
    )?);
    class.add_method(Method::new(
        Selector::register("handlePortMessage:"),
        adapter_port_message,
        "v@:@",
    )?);
    class.add_protocol(builtins.port_delegate)?;
    debug!("installed {ADAPTER_CLASS}");
    Ok(class)
}

unsafe extern "C-unwind" fn adapter_init(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let table: CallbackTable = arg(args, 0);
        receiver(this).set_payload(table);
        set_return(ret, this);
    }
}

unsafe extern "C-unwind" fn adapter_callbacks(
    this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe { set_return(ret, table_of(this)) };
}

unsafe extern "C-unwind" fn adapter_mach_message(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe { forward(this, CallbackTable::MACH_MESSAGE, arg(args, 0)) };
}

unsafe extern "C-unwind" fn adapter_port_message(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe { forward(this, CallbackTable::PORT_MESSAGE, arg(args, 0)) };
}

/// An adapter created without a table behaves as if both slots were empty.
unsafe fn table_of(this: *mut c_void) -> CallbackTable {
    unsafe { receiver(this).payload::<CallbackTable>() }
        .copied()
        .unwrap_or_default()
}

unsafe fn forward(this: *mut c_void, slot: usize, event: *mut c_void) {
    match unsafe { table_of(this) }.slots[slot] {
        Some(callback) => unsafe { callback(this, event) },
        None => trace!("adapter {this:p}: slot {slot} is empty, event {event:p} dropped"),
    }
}

define_obj_type!(
    /// An `OxPortDelegateAdapter`.
    pub PortDelegate(Object), base_symbols().port_delegate_adapter
);

impl PortDelegate {
    asel!(fn init_with_callbacks(table: CallbackTable) -> PortDelegate
        = Self::cls(), base_symbols().init_with_callbacks);

    rsel!(pub fn callbacks(&self) -> CallbackTable = base_symbols().callbacks);

    wsel!(pub fn handle_mach_message(&self, message: *mut c_void)
        = base_symbols().handle_mach_message);

    wsel!(pub fn handle_port_message(&self, message: &Id)
        = base_symbols().handle_port_message);
}

/// Wraps `table` in a new port delegate. The caller owns the result.
///
/// # Panics
///
/// Panics if the adapter's initializer returns nil, which it never does.
///
/// # Safety
///
/// Every callback in `table` must be sound to call with the adapter and any
/// event pointer, null included, for as long as the adapter lives. Mach
/// events arrive exactly as posted; nothing checks them.
#[must_use]
pub unsafe fn make_adapter(table: CallbackTable) -> Retained<PortDelegate> {
    match PortDelegate::init_with_callbacks(table) {
        Some(adapter) => {
            debug!("made port delegate adapter {:?}", &*adapter);
            adapter
        }
        None => {
            error!("{ADAPTER_CLASS} initializer returned nil");
            panic!("{ADAPTER_CLASS} initializer returned nil");
        }
    }
}
