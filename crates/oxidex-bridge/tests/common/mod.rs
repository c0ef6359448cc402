// Common fixtures for the bridge integration tests
//
// `BridgeFixture` is a runtime class with methods of every arity the
// trampolines support, struct arguments by value, both ownership
// conventions and a raising method. `Fixture` is its typed handle.

#![allow(dead_code)]

use oxidex_bridge::bridge::{ClassToken, Id, Object, String};
use oxidex_bridge::runtime::autorelease::autorelease;
use oxidex_bridge::runtime::builtins::string_contents;
use oxidex_bridge::runtime::dispatch::{arg, class_receiver, receiver, set_return};
use oxidex_bridge::runtime::exception::{self, names};
use oxidex_bridge::runtime::{Class, Imp, Method, ObjectPtr, Selector};
use oxidex_bridge::{asel, csel, define_obj_type, encode_struct, rsel, rwsel, symbol_table, wsel};
use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Unique suffix for classes created by individual tests
pub static TEST_ID: AtomicUsize = AtomicUsize::new(0);

pub fn unique_name(prefix: &str) -> std::string::String {
    format!("{prefix}_{}", TEST_ID.fetch_add(1, Ordering::SeqCst))
}

/// A point passed and returned by value
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

encode_struct!(Point = "OxPoint");

/// Instance state of a fixture
#[derive(Debug, Default)]
pub struct FixtureState {
    pub value: AtomicI64,
}

type ImpFn = unsafe extern "C-unwind" fn(*mut c_void, Selector, *const *const c_void, *mut c_void);

unsafe fn state<'a>(this: *mut c_void) -> &'a FixtureState {
    unsafe { receiver(this).payload::<FixtureState>() }
        .unwrap_or_else(|| exception::raise(names::INVALID_ARGUMENT, "fixture has no state"))
}

unsafe fn new_fixture(class: Class, value: i64) -> ObjectPtr {
    let obj = ObjectPtr::alloc(class);
    unsafe { obj.set_payload(FixtureState { value: AtomicI64::new(value) }) };
    obj
}

unsafe extern "C-unwind" fn fixture_with_value(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let obj = new_fixture(class_receiver(this), arg(args, 0));
        set_return(ret, autorelease(obj).as_raw());
    }
}

unsafe extern "C-unwind" fn sum_class(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let total: i64 = (0..4).map(|i| arg::<i64>(args, i)).sum();
        set_return(ret, total);
    }
}

unsafe extern "C-unwind" fn init_with_abc(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let total: i64 = (0..3).map(|i| arg::<i64>(args, i)).sum();
        receiver(this).set_payload(FixtureState { value: AtomicI64::new(total) });
        set_return(ret, this);
    }
}

unsafe extern "C-unwind" fn init_with_abcd(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let total: i64 = (0..4).map(|i| arg::<i64>(args, i)).sum();
        receiver(this).set_payload(FixtureState { value: AtomicI64::new(total) });
        set_return(ret, this);
    }
}

unsafe extern "C-unwind" fn init_nil(
    this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        // A failing initializer releases the allocation and returns nil
        receiver(this).release();
        set_return(ret, std::ptr::null_mut::<c_void>());
    }
}

unsafe extern "C-unwind" fn sum3(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let total: i64 = (0..3).map(|i| arg::<i64>(args, i)).sum();
        set_return(ret, total);
    }
}

unsafe extern "C-unwind" fn sum4(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let total: i64 = (0..4).map(|i| arg::<i64>(args, i)).sum();
        set_return(ret, total);
    }
}

unsafe extern "C-unwind" fn mix(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let a: i32 = arg(args, 0);
        let flag: bool = arg(args, 1);
        let count: i64 = arg(args, 2);
        let ratio: f64 = arg(args, 3);
        let sign = if flag { 1.0 } else { -1.0 };
        set_return(ret, sign * (f64::from(a) + count as f64) * ratio);
    }
}

unsafe extern "C-unwind" fn offset(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let p: Point = arg(args, 0);
        let dx: f64 = arg(args, 1);
        let dy: f64 = arg(args, 2);
        set_return(ret, Point { x: p.x + dx, y: p.y + dy });
    }
}

unsafe extern "C-unwind" fn value(
    this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe { set_return(ret, state(this).value.load(Ordering::SeqCst)) };
}

unsafe extern "C-unwind" fn set_value(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe { state(this).value.store(arg(args, 0), Ordering::SeqCst) };
}

unsafe extern "C-unwind" fn store4(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe {
        let packed = (0..4).fold(0i64, |acc, i| acc * 10 + arg::<i64>(args, i));
        state(this).value.store(packed, Ordering::SeqCst);
    }
}

unsafe extern "C-unwind" fn make_child(
    this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let child = new_fixture(receiver(this).class(), state(this).value.load(Ordering::SeqCst) + 1);
        set_return(ret, autorelease(child).as_raw());
    }
}

unsafe extern "C-unwind" fn new_child(
    this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe {
        let child = new_fixture(receiver(this).class(), state(this).value.load(Ordering::SeqCst) + 1);
        set_return(ret, child.as_raw());
    }
}

unsafe extern "C-unwind" fn nothing(
    _this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe { set_return(ret, std::ptr::null_mut::<c_void>()) };
}

unsafe extern "C-unwind" fn nil_class(
    _this: *mut c_void,
    _cmd: Selector,
    _args: *const *const c_void,
    ret: *mut c_void,
) {
    unsafe { set_return(ret, std::ptr::null_mut::<c_void>()) };
}

unsafe extern "C-unwind" fn fail(
    _this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe {
        let reason = ObjectPtr::from_raw(arg(args, 0))
            .and_then(|obj| string_contents(obj))
            .unwrap_or("");
        exception::raise(names::GENERIC, reason);
    }
}

unsafe extern "C-unwind" fn fail_after_store(
    this: *mut c_void,
    _cmd: Selector,
    args: *const *const c_void,
    _ret: *mut c_void,
) {
    unsafe {
        state(this).value.store(arg(args, 0), Ordering::SeqCst);
        exception::raise(names::GENERIC, "stored then raised");
    }
}

fn method(name: &str, imp: ImpFn, types: &str) -> Method {
    let imp: Imp = imp;
    Method::new(Selector::register(name), imp, types).expect("valid fixture method")
}

/// Registers `BridgeFixture` once and returns its token
pub fn fixture_token() -> ClassToken {
    static CLASS: OnceLock<Class> = OnceLock::new();
    let class = *CLASS.get_or_init(|| {
        oxidex_bridge::bridge::preload();
        let root = Object::cls().class();
        let class = Class::new("BridgeFixture", root).expect("fixture class");
        class.add_class_method(method("fixtureWithValue:", fixture_with_value, "@#:q"));
        class.add_class_method(method("sumA:b:c:d:", sum_class, "q#:qqqq"));
        class.add_method(method("initWithA:b:c:", init_with_abc, "@@:qqq"));
        class.add_method(method("initWithA:b:c:d:", init_with_abcd, "@@:qqqq"));
        class.add_method(method("initFailing", init_nil, "@@:"));
        class.add_method(method("sumA:b:c:", sum3, "q@:qqq"));
        class.add_method(method("sumA:b:c:d:", sum4, "q@:qqqq"));
        class.add_method(method("mix:flag:count:ratio:", mix, "d@:iBqd"));
        class.add_method(method("offset:dx:dy:", offset, "{OxPoint}@:{OxPoint}dd"));
        class.add_method(method("value", value, "q@:"));
        class.add_method(method("setValue:", set_value, "v@:q"));
        class.add_method(method("storeA:b:c:d:", store4, "v@:qqqq"));
        class.add_method(method("makeChild", make_child, "@@:"));
        class.add_method(method("newChild", new_child, "@@:"));
        class.add_method(method("nothing", nothing, "@@:"));
        class.add_method(method("nilClass", nil_class, "#@:"));
        class.add_method(method("fail:", fail, "v@:@"));
        class.add_method(method("failAfterStoring:", fail_after_store, "v@:q"));
        class
    });
    ClassToken::new(class)
}

symbol_table! {
    pub struct FixtureSymbols in fixture_symbols {
        classes {}
        selectors {
            with_value = "fixtureWithValue:",
            sum_class = "sumA:b:c:d:",
            init_abc = "initWithA:b:c:",
            init_abcd = "initWithA:b:c:d:",
            init_failing = "initFailing",
            sum3 = "sumA:b:c:",
            sum4 = "sumA:b:c:d:",
            mix = "mix:flag:count:ratio:",
            offset = "offset:dx:dy:",
            value = "value",
            set_value = "setValue:",
            store4 = "storeA:b:c:d:",
            make_child = "makeChild",
            new_child = "newChild",
            nothing = "nothing",
            nil_class = "nilClass",
            fail = "fail:",
            fail_after_storing = "failAfterStoring:",
        }
    }
}

define_obj_type!(
    /// A `BridgeFixture`
    pub Fixture(Object), fixture_token()
);

impl Fixture {
    csel!(pub not_retained fn with_value(value: i64) -> Fixture
        = Self::cls(), fixture_symbols().with_value);
    csel!(pub retained fn with_value_retained(value: i64) -> Fixture
        = Self::cls(), fixture_symbols().with_value);
    csel!(pub fn sum_class(a: i64, b: i64, c: i64, d: i64) -> i64
        = Self::cls(), fixture_symbols().sum_class);

    asel!(pub fn init_abc(a: i64, b: i64, c: i64) -> Fixture
        = Self::cls(), fixture_symbols().init_abc);
    asel!(pub fn init_abcd(a: i64, b: i64, c: i64, d: i64) -> Fixture
        = Self::cls(), fixture_symbols().init_abcd);
    asel!(pub fn init_failing() -> Fixture = Self::cls(), fixture_symbols().init_failing);

    rsel!(pub fn sum3(&self, a: i64, b: i64, c: i64) -> i64 = fixture_symbols().sum3);
    rsel!(pub fn sum4(&self, a: i64, b: i64, c: i64, d: i64) -> i64 = fixture_symbols().sum4);
    rsel!(pub fn mix(&self, a: i32, flag: bool, count: i64, ratio: f64) -> f64
        = fixture_symbols().mix);
    rsel!(pub fn offset(&self, p: Point, dx: f64, dy: f64) -> Point = fixture_symbols().offset);
    rwsel!(pub fn value, set_value: i64 = fixture_symbols().value, fixture_symbols().set_value);
    wsel!(pub fn store4(&self, a: i64, b: i64, c: i64, d: i64) = fixture_symbols().store4);

    rsel!(pub not_retained fn make_child(&self) -> Fixture = fixture_symbols().make_child);
    rsel!(pub retained fn new_child(&self) -> Fixture = fixture_symbols().new_child);
    // Tags that go against what the method natively returns
    rsel!(pub retained fn make_child_retained(&self) -> Fixture = fixture_symbols().make_child);
    rsel!(pub not_retained fn new_child_unretained(&self) -> Fixture
        = fixture_symbols().new_child);
    rsel!(pub retained fn nothing_retained(&self) -> Id = fixture_symbols().nothing);
    rsel!(pub not_retained fn nothing(&self) -> Id = fixture_symbols().nothing);
    rsel!(pub fn nil_class(&self) -> Option<Class> = fixture_symbols().nil_class);

    wsel!(pub guarded fn fail(&self, reason: &String) = fixture_symbols().fail);
    wsel!(pub guarded fn fail_after_storing(&self, value: i64)
        = fixture_symbols().fail_after_storing);
    // Declared with the wrong argument type on purpose
    rsel!(pub guarded fn sum3_mistyped(&self, a: i32) -> i64 = fixture_symbols().sum3);
    rsel!(pub guarded fn missing(&self) -> i64 = fixture_symbols().with_value);
}

/// A retained fixture with the given value
pub fn fixture(value: i64) -> oxidex_bridge::bridge::Retained<Fixture> {
    let fixture = Fixture::init_abc(value, 0, 0).expect("fixture init");
    assert_eq!(fixture.value(), value);
    fixture
}
