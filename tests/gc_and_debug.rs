//! Regression coverage for the GC root set and the `debug` upvalue
//! introspection functions, split out from `spec_scenarios.rs` the way
//! the teacher splits `test_gc_metamethods.rs` from `test_basic.rs` —
//! one file per subsystem rather than one sprawling file.

fn run(src: &str) -> Vec<luna_core::value::Value> {
    match luna_core::run_script(src.as_bytes(), "test") {
        Ok(values) => values,
        Err(e) => panic!("script failed: {}", e.message),
    }
}

fn as_bool(v: &luna_core::value::Value) -> bool {
    matches!(v, luna_core::value::Value::Bool(true))
}

/// `collectgarbage("collect")` must not sweep the global table, a live
/// local still on the call stack, or an upvalue a live closure holds.
/// Before the evaluator tracked `extra_roots`, every one of these was
/// swept on the very first collection.
#[test]
fn collecting_garbage_keeps_reachable_values_alive() {
    let out = run(
        r#"
        counter = { n = 0 }
        local function bump()
            counter.n = counter.n + 1
            return counter.n
        end
        collectgarbage("collect")
        local before = bump()
        collectgarbage("collect")
        local after = bump()
        return before == 1 and after == 2 and counter.n == 2
    "#,
    );
    assert!(as_bool(&out[0]), "reachable table/closure/local should survive collectgarbage");
}

#[test]
fn two_collections_leave_count_non_increasing() {
    run(
        r#"
        local t = {}
        for i = 1, 1000 do t[i] = { i } end
        collectgarbage("collect")
        local first = collectgarbage("count")
        t = nil
        collectgarbage("collect")
        local second = collectgarbage("count")
        assert(second <= first, "count should not increase across a second full collection")
    "#,
    );
}

#[test]
fn getupvalue_and_setupvalue_round_trip() {
    let out = run(
        r#"
        local function make()
            local secret = 1
            return function() return secret end
        end
        local f = make()
        local name = debug.setupvalue(f, 1, 99)
        local name2, value = debug.getupvalue(f, 1)
        return name == name2 and value == 99 and f() == 99
    "#,
    );
    assert!(as_bool(&out[0]), "setupvalue then getupvalue should observe the written value");
}

#[test]
fn upvaluejoin_aliases_two_closures_upvalues() {
    let out = run(
        r#"
        local function make()
            local v = 1
            local getter = function() return v end
            local setter = function(x) v = x end
            return getter, setter
        end
        local g1, s1 = make()
        local g2, s2 = make()
        debug.upvaluejoin(g1, 1, g2, 1)
        s2(42)
        return g1() == 42
    "#,
    );
    assert!(as_bool(&out[0]), "upvaluejoin should make g1's upvalue alias g2's cell");
}

/// `string.dump` only has source text to hand for a chunk closure
/// itself (the one `load` produced), not for a nested function literal
/// evaluated inside it — this core has no per-function bytecode to fall
/// back on, so the round trip is exercised on a `load`-produced chunk.
#[test]
fn string_dump_round_trips_through_load() {
    let out = run(
        r#"
        local greet = load("local name = ... return 'hi ' .. name")
        local dumped = string.dump(greet)
        local reloaded = load(dumped)
        return reloaded("world") == "hi world"
    "#,
    );
    assert!(as_bool(&out[0]), "load(string.dump(f)) should behave like f");
}

#[test]
fn string_dump_refuses_native_functions() {
    let err = luna_core::run_script(b"string.dump(print)", "test").expect_err("dumping a native function must error");
    assert!(err.message.contains("unable to dump"), "message was: {}", err.message);
}
