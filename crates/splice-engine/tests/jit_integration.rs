//! End-to-end JIT integration tests.
//!
//! Exercise the full pipeline — module source → registration → symbol
//! resolution → native execution — plus the ownership and lifecycle
//! contracts around it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use splice_engine::bytecode::{decode_module, encode_module};
use splice_engine::{
    build_sum_module, parse_module, BoundModule, Context, EngineError, HostAddr, JitConfig,
    JitEngine, SymbolResolver, Visibility,
};

fn engine() -> JitEngine {
    JitEngine::new().expect("host ISA should be available")
}

fn add_source(engine: &mut JitEngine, src: &str) -> Arc<Context> {
    let ctx = Arc::new(Context::new());
    let module = parse_module(src, &ctx).expect("fixture should parse");
    engine
        .add_module(BoundModule::new(module, ctx.clone()))
        .expect("fixture should register");
    ctx
}

unsafe fn as_fn2(addr: *const u8) -> extern "C" fn(i32, i32) -> i32 {
    std::mem::transmute(addr)
}

unsafe fn as_fn1(addr: *const u8) -> extern "C" fn(i32) -> i32 {
    std::mem::transmute(addr)
}

unsafe fn as_fn0(addr: *const u8) -> extern "C" fn() -> i32 {
    std::mem::transmute(addr)
}

/// Resolver redirecting one name prefix to a fixed host address, counting
/// invocations.
struct PrefixResolver {
    prefix: &'static str,
    addr: HostAddr,
    calls: AtomicUsize,
}

impl PrefixResolver {
    fn new(prefix: &'static str, addr: HostAddr) -> Self {
        PrefixResolver {
            prefix,
            addr,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SymbolResolver for PrefixResolver {
    fn resolve(&self, name: &str) -> Option<HostAddr> {
        if name.starts_with(self.prefix) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(self.addr)
        } else {
            None
        }
    }
}

// ============================================================================
// Programmatic build
// ============================================================================

#[test]
fn built_sum_computes() {
    let ctx = Arc::new(Context::new());
    let module = build_sum_module(&ctx);

    let mut engine = engine();
    engine
        .add_module(BoundModule::new(module, ctx))
        .expect("demo module registers");

    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    assert_eq!(sum(1, 2), 3);
    assert_eq!(sum(40, 2), 42);
    assert_eq!(sum(-1, 1), 0);

    engine.close().unwrap();
}

#[test]
fn sum_overflow_wraps() {
    let ctx = Arc::new(Context::new());
    let module = build_sum_module(&ctx);

    let mut engine = engine();
    engine.add_module(BoundModule::new(module, ctx)).unwrap();

    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    // 0x80000000 + 0x80000000 wraps to 0 in two's complement.
    assert_eq!(sum(i32::MIN, i32::MIN), 0);
    assert_eq!(sum(i32::MAX, 1), i32::MIN);

    engine.close().unwrap();
}

// ============================================================================
// Text and container sources
// ============================================================================

#[test]
fn parsed_text_computes() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module demo

fn sum(i32, i32) -> i32 {
b0:
    r2 = iadd r0, r1
    ret r2
}
",
    );

    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    assert_eq!(sum(2, 40), 42);

    engine.close().unwrap();
}

#[test]
fn container_roundtrip_computes() {
    let ctx = Context::new();
    let bytes = encode_module(&build_sum_module(&ctx), &ctx);

    let ctx2 = Arc::new(Context::new());
    let module = decode_module(&bytes, &ctx2).unwrap();

    let mut engine = engine();
    engine.add_module(BoundModule::new(module, ctx2)).unwrap();

    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    assert_eq!(sum(19, 23), 42);

    engine.close().unwrap();
}

#[test]
fn branches_compute() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module branches

fn pick(i32) -> i32 {
entry:
    r1 = const.i32 0
    r2 = icmp.lt r0, r1
    br r2, negative, positive
negative:
    r3 = const.i32 -1
    ret r3
positive:
    r4 = const.i32 1
    ret r4
}
",
    );

    let pick = unsafe { as_fn1(engine.lookup("pick").unwrap()) };
    assert_eq!(pick(-5), -1);
    assert_eq!(pick(0), 1);
    assert_eq!(pick(123), 1);

    engine.close().unwrap();
}

// ============================================================================
// Host redirection
// ============================================================================

static HELLO_CALLS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn host_hello() {
    HELLO_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn undefined_hello_redirects_to_host() {
    let mut engine = engine();
    let resolver = Arc::new(PrefixResolver::new(
        "hello",
        HostAddr(host_hello as usize as u64),
    ));
    engine.unit().add_resolver(resolver.clone());

    add_source(
        &mut engine,
        "
module hello_demo

extern fn hello()

fn sum(i32, i32) -> i32 {
b0:
    call hello()
    r2 = iadd r0, r1
    ret r2
}
",
    );

    let before = HELLO_CALLS.load(Ordering::SeqCst);
    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    assert_eq!(sum(2, 3), 5);
    assert_eq!(HELLO_CALLS.load(Ordering::SeqCst), before + 1);

    // The redirect is a permanent weak binding under the original name.
    let binding = engine.unit().binding("hello").unwrap();
    assert_eq!(binding.visibility(), Visibility::Weak);
    assert_eq!(binding.addr(), HostAddr(host_hello as usize as u64));

    engine.close().unwrap();
}

extern "C" fn host_ping() {}

#[test]
fn resolver_not_reinvoked_for_bound_names() {
    let mut engine = engine();
    let resolver = Arc::new(PrefixResolver::new(
        "ping",
        HostAddr(host_ping as usize as u64),
    ));
    engine.unit().add_resolver(resolver.clone());

    add_source(
        &mut engine,
        "
module first

extern fn ping()

fn a() {
b0:
    call ping()
    ret
}
",
    );
    engine.lookup("a").unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

    // A second module importing the same name triggers a second episode;
    // the name is satisfied from the installed binding.
    add_source(
        &mut engine,
        "
module second

extern fn ping()

fn b() {
b0:
    call ping()
    ret
}
",
    );
    engine.lookup("b").unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

    engine.close().unwrap();
}

extern "C" fn host_one() -> i32 {
    1
}

#[test]
fn compiled_definition_overrides_weak_redirect() {
    let mut engine = engine();
    engine.unit().add_resolver(Arc::new(PrefixResolver::new(
        "hello",
        HostAddr(host_one as usize as u64),
    )));

    add_source(
        &mut engine,
        "
module a

extern fn hello() -> i32

fn caller() -> i32 {
b0:
    r0 = call.i32 hello()
    ret r0
}
",
    );

    // First lookup links via the host redirect.
    let caller = unsafe { as_fn0(engine.lookup("caller").unwrap()) };
    assert_eq!(caller(), 1);

    // A module-compiled definition of the same name wins over the weak
    // redirect for subsequent lookups.
    add_source(
        &mut engine,
        "
module b

fn hello() -> i32 {
b0:
    r0 = const.i32 7
    ret r0
}
",
    );
    let hello = unsafe { as_fn0(engine.lookup("hello").unwrap()) };
    assert_eq!(hello(), 7);

    engine.close().unwrap();
}

#[test]
fn strong_binding_collides_with_module_definition() {
    let mut engine = engine();
    engine
        .unit()
        .install("occupied", HostAddr(0x1000), Visibility::Strong)
        .unwrap();

    let ctx = Arc::new(Context::new());
    let module = parse_module(
        "
module clash

fn occupied() -> i32 {
b0:
    r0 = const.i32 1
    ret r0
}
",
        &ctx,
    )
    .unwrap();

    let err = engine.add_module(BoundModule::new(module, ctx)).unwrap_err();
    assert!(matches!(err, EngineError::Registration { .. }));

    engine.close().unwrap();
}

static CAPTURED: Mutex<Option<Vec<u8>>> = Mutex::new(None);

extern "C" fn host_take(ptr: *const u8, len: i64) {
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
    *CAPTURED.lock().unwrap() = Some(bytes.to_vec());
}

#[test]
fn data_objects_reach_host_functions() {
    let mut engine = engine();
    engine.unit().add_resolver(Arc::new(PrefixResolver::new(
        "take",
        HostAddr(host_take as usize as u64),
    )));

    add_source(
        &mut engine,
        r#"
module msg

extern fn take(ptr, i64)
data greeting = "hi"

fn go() {
b0:
    r0 = addr greeting
    r1 = const.i64 2
    call take(r0, r1)
    ret
}
"#,
    );

    let go: extern "C" fn() = unsafe { std::mem::transmute(engine.lookup("go").unwrap()) };
    go();
    assert_eq!(CAPTURED.lock().unwrap().take().unwrap(), b"hi");

    engine.close().unwrap();
}

// ============================================================================
// Ownership transfer
// ============================================================================

#[test]
fn failed_registration_disposes_the_bundle() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module a

fn sum(i32, i32) -> i32 {
b0:
    r2 = iadd r0, r1
    ret r2
}
",
    );

    // Second module defining the same symbol is rejected by the backend.
    let ctx = Arc::new(Context::new());
    let weak: Weak<Context> = Arc::downgrade(&ctx);
    let module = parse_module(
        "
module b

fn sum(i32, i32) -> i32 {
b0:
    r2 = isub r0, r1
    ret r2
}
",
        &ctx,
    )
    .unwrap();

    let bundle = BoundModule::new(module, ctx);
    let err = engine.add_module(bundle).unwrap_err();
    assert!(matches!(err, EngineError::Registration { .. }));

    // Ownership never moved: the registry disposed the bundle — module and
    // context — exactly once. Nothing is left for the caller to release.
    assert!(weak.upgrade().is_none());

    // The engine still works.
    let sum = unsafe { as_fn2(engine.lookup("sum").unwrap()) };
    assert_eq!(sum(1, 2), 3);

    engine.close().unwrap();
}

#[test]
fn successful_registration_retains_the_context() {
    let ctx = Arc::new(Context::new());
    let weak: Weak<Context> = Arc::downgrade(&ctx);
    let module = build_sum_module(&ctx);

    let mut engine = engine();
    engine.add_module(BoundModule::new(module, ctx)).unwrap();

    // The instance now owns the context...
    assert!(weak.upgrade().is_some());

    // ...until it is closed.
    engine.close().unwrap();
    assert!(weak.upgrade().is_none());
}

// ============================================================================
// Lookup failures
// ============================================================================

extern "C" fn host_mystery() {}

#[test]
fn unresolved_symbol_fails_lookup_then_resolver_fixes_it() {
    let mut engine = JitEngine::with_config(JitConfig {
        process_symbols: false,
        ..Default::default()
    })
    .unwrap();

    add_source(
        &mut engine,
        "
module needs_help

extern fn mystery()

fn go() {
b0:
    call mystery()
    ret
}
",
    );

    match engine.lookup("go").unwrap_err() {
        EngineError::Lookup { names } => assert_eq!(names, vec!["mystery".to_string()]),
        other => panic!("expected lookup failure, got {other:?}"),
    }

    // Attaching a resolver that knows the name makes a retry succeed.
    engine.unit().add_resolver(Arc::new(PrefixResolver::new(
        "mystery",
        HostAddr(host_mystery as usize as u64),
    )));
    engine.lookup("go").unwrap();

    engine.close().unwrap();
}

#[test]
fn all_prefix_name_is_an_invariant_violation() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module bad

extern fn ____()

fn go() {
b0:
    call ____()
    ret
}
",
    );

    let err = engine.lookup("go").unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)));

    engine.close().unwrap();
}

// ============================================================================
// Cross-module linking
// ============================================================================

#[test]
fn modules_link_against_each_other() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module library

fn add1(i32) -> i32 {
b0:
    r1 = const.i32 1
    r2 = iadd r0, r1
    ret r2
}
",
    );
    add_source(
        &mut engine,
        "
module client

extern fn add1(i32) -> i32

fn twice(i32) -> i32 {
b0:
    r1 = call.i32 add1(r0)
    r2 = call.i32 add1(r1)
    ret r2
}
",
    );

    let twice = unsafe { as_fn1(engine.lookup("twice").unwrap()) };
    assert_eq!(twice(5), 7);

    engine.close().unwrap();
}

// ============================================================================
// Teardown
// ============================================================================

static TEARDOWN_NOTES: AtomicUsize = AtomicUsize::new(0);

extern "C" fn host_note_teardown() {
    TEARDOWN_NOTES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn teardown_functions_run_at_close() {
    let mut engine = engine();
    engine.unit().add_resolver(Arc::new(PrefixResolver::new(
        "note_teardown",
        HostAddr(host_note_teardown as usize as u64),
    )));

    add_source(
        &mut engine,
        "
module td

extern fn note_teardown()

dtor fn cleanup() -> i32 {
b0:
    call note_teardown()
    r0 = const.i32 0
    ret r0
}
",
    );

    let before = TEARDOWN_NOTES.load(Ordering::SeqCst);
    engine.close().unwrap();
    assert_eq!(TEARDOWN_NOTES.load(Ordering::SeqCst), before + 1);
}

#[test]
fn failing_teardown_is_reported() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module td

dtor fn cleanup() -> i32 {
b0:
    r0 = const.i32 3
    ret r0
}
",
    );

    let err = engine.close().unwrap_err();
    assert!(matches!(err, EngineError::Teardown(_)));
}

#[test]
fn teardown_with_bad_signature_is_rejected() {
    let mut engine = engine();
    let ctx = Arc::new(Context::new());
    let module = parse_module(
        "
module td

dtor fn cleanup(i32) -> i32 {
b0:
    ret r0
}
",
        &ctx,
    )
    .unwrap();

    let err = engine.add_module(BoundModule::new(module, ctx)).unwrap_err();
    assert!(matches!(err, EngineError::Registration { .. }));

    engine.close().unwrap();
}

// ============================================================================
// Process-symbol fallback
// ============================================================================

#[cfg(unix)]
#[test]
fn process_symbols_resolve_libc() {
    let mut engine = engine();
    add_source(
        &mut engine,
        "
module libc_user

extern fn strlen(ptr) -> i64
data word = \"splice\\0\"

fn word_len() -> i64 {
b0:
    r0 = addr word
    r1 = call.i64 strlen(r0)
    ret r1
}
",
    );

    // "strlen" resolves from the process image without any attached
    // resolver — the default host-symbol fallback layer.
    let word_len: extern "C" fn() -> i64 =
        unsafe { std::mem::transmute(engine.lookup("word_len").unwrap()) };
    assert_eq!(word_len(), 6);

    engine.close().unwrap();
}
