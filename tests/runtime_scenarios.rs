mod common;

use common::Fixture;
use std::rc::Rc;
use testrig::{ErrorKind, MockOptions, Value, SENTINEL_FILENAME, SENTINEL_ID};

#[test]
fn real_module_is_cached_and_shared() {
    let fx = Fixture::new();
    let entry = fx.path("a.js");
    fx.file("b.js", "module.exports = { n: 1 };\n");
    let runtime = fx.runtime();

    let first = runtime.require(&entry, "./b").unwrap();
    assert_eq!(first.get("n"), Value::Number(1.0));

    first.set("n", Value::Number(2.0));
    let second = runtime.require(&entry, "./b").unwrap();
    assert_eq!(second.get("n"), Value::Number(2.0));
    assert_eq!(first, second, "same exports reference across requires");
}

#[test]
fn registry_reset_breaks_reference_identity() {
    let fx = Fixture::new();
    let entry = fx.path("a.js");
    fx.file("b.js", "module.exports = { n: 1 };\n");
    let runtime = fx.runtime();

    let first = runtime.require(&entry, "./b").unwrap();
    first.set("n", Value::Number(2.0));

    runtime.reset_module_registry();
    let fresh = runtime.require(&entry, "./b").unwrap();
    assert_ne!(fresh, first);
    assert_eq!(fresh.get("n"), Value::Number(1.0));
}

#[test]
fn cycle_partner_observes_pre_assignment_exports() {
    let fx = Fixture::new();
    let entry = fx.path("entry.js");
    fx.file(
        "a.js",
        "exports.a = 1;\nrequire('./b');\nexports.a = 2;\n",
    );
    fx.file(
        "b.js",
        "const A = require('./a');\nexports.seen = A.a;\n",
    );
    let runtime = fx.runtime();

    let a = runtime.require(&entry, "./a").unwrap();
    assert_eq!(a.get("a"), Value::Number(2.0));

    let b = runtime.require(&entry, "./b").unwrap();
    assert_eq!(b.get("seen"), Value::Number(1.0), "b saw a mid-cycle");
}

#[test]
fn automock_replaces_exported_functions() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("u.js", "exports.k = function() { return 7; };\n");
    let runtime = fx.runtime_with(|config| config.automock = true);

    assert!(runtime.should_mock(&entry, "./u").unwrap());
    let mocked = runtime.require(&entry, "./u").unwrap();
    let k = mocked.get("k");
    assert!(k.as_mock().is_some());
    assert_eq!(k.call(&[]).unwrap(), Value::Undefined);
    assert_eq!(k.as_mock().unwrap().call_count(), 1);

    // The real module still answers through the bypassing surface.
    let real = runtime.require_module(&entry, Some("./u")).unwrap();
    assert_eq!(real.get("k").call(&[]).unwrap(), Value::Number(7.0));
}

#[test]
fn automock_generation_never_touches_caller_registries() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("u.js", "exports.k = function() { return 7; };\n");
    let runtime = fx.runtime_with(|config| config.automock = true);

    let _ = runtime.require(&entry, "./u").unwrap();
    assert_eq!(
        runtime.loaded_module_count(),
        0,
        "generating the mock executed the real module in isolation"
    );
}

#[test]
fn manual_mock_sidecars_are_per_directory() {
    let fx = Fixture::new();
    fx.file("sub/M.js", "exports.which = 'real-sub';\n");
    fx.file("sub/__mocks__/M.js", "exports.which = 'sub';\n");
    fx.file("other/M.js", "exports.which = 'real-other';\n");
    fx.file("other/__mocks__/M.js", "exports.which = 'other';\n");
    let runtime = fx.runtime();

    let sub_entry = fx.path("sub/x.js");
    runtime.create_facade(&sub_entry).mock("./M");
    let from_sub = runtime.require(&sub_entry, "./M").unwrap();
    assert_eq!(from_sub.get("which"), Value::String("sub".to_string()));

    let other_entry = fx.path("other/x.js");
    runtime.create_facade(&other_entry).mock("./M");
    let from_other = runtime.require(&other_entry, "./M").unwrap();
    assert_eq!(from_other.get("which"), Value::String("other".to_string()));
}

#[test]
fn virtual_mock_needs_no_file_on_disk() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let runtime = fx.runtime();
    let facade = runtime.create_facade(&entry);

    facade.mock_with_options(
        "nope",
        Some(Rc::new(|| {
            let value = Value::object();
            value.set("v", Value::Number(42.0));
            value
        })),
        MockOptions { virtual_mock: true },
    );

    assert!(runtime.should_mock(&entry, "nope").unwrap());
    let delivered = runtime.require(&entry, "nope").unwrap();
    assert_eq!(delivered.get("v"), Value::Number(42.0));
}

#[test]
fn unmock_list_extends_through_flat_installs() {
    let fx = Fixture::new();
    let a = fx.file(
        "p/node_modules/pkga/index.js",
        "exports.name = 'pkga';\n",
    );
    let b = fx.file(
        "p/node_modules/pkgb/index.js",
        "exports.name = 'pkgb';\n",
    );
    fx.file(
        "p/node_modules/pkgc/index.js",
        "exports.name = 'pkgc';\n",
    );
    let runtime = fx.runtime_with(|config| {
        config.automock = true;
        config.unmocked_module_path_patterns = vec!["node_modules/pkga".to_string()];
    });

    assert!(!runtime.should_mock(&a, "pkgb").unwrap());
    assert!(
        !runtime.should_mock(&b, "pkgc").unwrap(),
        "exemption propagates transitively"
    );
}

#[test]
fn mock_then_unmock_is_real_and_vice_versa() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("m.js", "exports.m = 1;\n");
    let runtime = fx.runtime();
    let facade = runtime.create_facade(&entry);

    facade.mock("./m").unmock("./m");
    assert!(!runtime.should_mock(&entry, "./m").unwrap());

    facade.unmock("./m").mock("./m");
    assert!(runtime.should_mock(&entry, "./m").unwrap());
}

#[test]
fn normalised_ids_are_deterministic() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("m.js", "exports.m = 1;\n");
    let runtime = fx.runtime();

    let first = runtime.normalize_id(&entry, Some("./m")).unwrap();
    let second = runtime.normalize_id(&entry, Some("./m")).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.key(), second.key());
}

#[test]
fn registry_reset_clears_global_mock_functions() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let runtime = fx.runtime();
    let facade = runtime.create_facade(&entry);

    let spy = facade.mock_fn();
    runtime
        .environment()
        .global()
        .unwrap()
        .set("spy", spy.clone());
    spy.call(&[Value::Number(1.0)]).unwrap();
    assert_eq!(spy.as_mock().unwrap().call_count(), 1);

    runtime.reset_module_registry();
    assert_eq!(spy.as_mock().unwrap().call_count(), 0);
}

#[test]
fn ghost_manual_mock_loads_for_mock_only_modules() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("__mocks__/ghost.js", "exports.haunted = true;\n");
    let runtime = fx.runtime();

    // No real module named `ghost` exists anywhere in the tree.
    let delivered = runtime.require(&entry, "ghost").unwrap();
    assert_eq!(delivered.get("haunted"), Value::Bool(true));
}

#[test]
fn json_modules_parse_through_the_sandbox() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("data.json", "{\"version\": 3, \"tags\": [\"a\"]}\n");
    let runtime = fx.runtime();

    let data = runtime.require(&entry, "./data.json").unwrap();
    assert_eq!(data.get("version"), Value::Number(3.0));
    assert_eq!(data.get("tags").type_name(), "array");
}

#[test]
fn core_modules_come_from_the_environment() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let config = fx.config();

    let built = testrig::build_haste_map(
        &config,
        testrig::BuildOptions {
            max_workers: 1,
            core_modules: vec!["path".to_string()],
        },
    )
    .unwrap();
    let resolver: Rc<dyn testrig::Resolver> = built.resolver;
    let environment = testrig::SandboxEnvironment::new();
    let exports = Value::object();
    exports.set("sep", Value::String("/".to_string()));
    environment.register_core_module("path", exports);

    let runtime = testrig::Runtime::new(
        config,
        environment,
        resolver,
        Rc::new(testrig::SourceTransformer),
        testrig::SharedContext::new(),
    )
    .unwrap();

    let delivered = runtime.require(&entry, "path").unwrap();
    assert_eq!(delivered.get("sep"), Value::String("/".to_string()));
    // Core modules are never automocked.
    assert!(!runtime.should_mock(&entry, "path").unwrap());
}

#[test]
fn module_parent_is_the_sentinel() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file(
        "child.js",
        "exports.pf = module.parent.filename;\nexports.pid = module.parent.id;\n",
    );
    let runtime = fx.runtime();

    let child = runtime.require(&entry, "./child").unwrap();
    assert_eq!(
        child.get("pf"),
        Value::String(SENTINEL_FILENAME.to_string())
    );
    assert_eq!(child.get("pid"), Value::String(SENTINEL_ID.to_string()));
}

#[test]
fn syntax_errors_name_the_file_and_preprocessor() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("bad.js", "exports.a = @;\n");
    let runtime = fx.runtime();

    let error = runtime.require(&entry, "./bad").unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert!(error.message.contains("bad.js"));
    assert!(error.message.contains("preprocessor"));
}

#[test]
fn failed_execution_leaves_the_placeholder_registered() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("boom.js", "exports.a = 1;\nmissing_variable;\n");
    let runtime = fx.runtime();

    assert!(runtime.require(&entry, "./boom").is_err());
    assert_eq!(runtime.loaded_module_count(), 1);

    // A later require observes the partial exports instead of re-running.
    let partial = runtime.require(&entry, "./boom").unwrap();
    assert_eq!(partial.get("a"), Value::Number(1.0));
}

#[test]
fn setup_files_run_before_anything_else() {
    let fx = Fixture::new();
    let setup = fx.file("setup.js", "global.ready = true;\n");
    let runtime = fx.runtime_with(|config| config.setup_files = vec![setup.clone()]);

    let global = runtime.environment().global().unwrap();
    assert_eq!(global.get("ready"), Value::Bool(true));
}

#[test]
fn require_actual_bypasses_the_oracle() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("u.js", "exports.k = function() { return 7; };\n");
    let runtime = fx.runtime_with(|config| config.automock = true);

    let require = runtime.create_require(&entry);
    let actual = require.require_actual("./u").unwrap();
    assert_eq!(actual.get("k").call(&[]).unwrap(), Value::Number(7.0));

    // The inert host-compatibility fields are present and empty.
    assert!(require.cache.keys().is_empty());
    assert!(require.extensions.keys().is_empty());
}

#[test]
fn dialect_reaches_resolve_and_actual_through_require() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("b.js", "module.exports = { n: 1 };\n");
    fx.file(
        "meta.js",
        "exports.at = require.resolve('./b');\nexports.real = require.requireActual('./b');\n",
    );
    let runtime = fx.runtime();

    let meta = runtime.require(&entry, "./meta").unwrap();
    let resolved = meta.get("at");
    assert!(resolved.as_str().unwrap().ends_with("b.js"));
    assert_eq!(meta.get("real").get("n"), Value::Number(1.0));
}

#[test]
fn coverage_is_collected_for_instrumented_files() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let covered = fx.file("cov.js", "exports.a = 1;\nexports.b = 2;\n");
    let runtime = fx.runtime_with(|config| config.collect_coverage = true);

    let _ = runtime.require(&entry, "./cov").unwrap();
    let info = runtime.get_all_coverage_info();
    assert_eq!(info.get(&covered), Some(&vec![1, 2]));
}

#[test]
fn coverage_skips_mocks_and_tests() {
    let fx = Fixture::new();
    let runtime = fx.runtime_with(|config| config.collect_coverage = true);

    assert!(runtime.should_collect_coverage(&fx.path("lib.js")));
    assert!(!runtime.should_collect_coverage(&fx.path("__mocks__/lib.js")));
    assert!(!runtime.should_collect_coverage(&fx.path("__tests__/lib.js")));
    assert!(!runtime.should_collect_coverage(&fx.path("node_modules/dep/index.js")));
}

#[test]
fn facade_exposes_frozen_env_data_and_matchers() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let runtime = fx.runtime_with(|config| {
        config
            .test_env_data
            .insert("flag".to_string(), serde_json::Value::Bool(true));
    });
    let facade = runtime.create_facade(&entry);

    let data = facade.get_test_env_data();
    assert_eq!(data.get("flag"), Value::Bool(true));
    data.set("flag", Value::Bool(false));
    assert_eq!(data.get("flag"), Value::Bool(true), "frozen");

    let matchers = Value::object();
    matchers.set("toBeSeven", facade.mock_fn());
    facade.add_matchers(matchers);
    let installed = runtime
        .environment()
        .global()
        .unwrap()
        .get("testFramework")
        .get("matchers");
    assert!(installed.get("toBeSeven").as_mock().is_some());
}

#[test]
fn facade_drives_fake_timers() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    let runtime = fx.runtime();
    let facade = runtime.create_facade(&entry);

    facade.use_fake_timers();
    let fired = facade.mock_fn();
    runtime
        .environment()
        .fake_timers()
        .schedule_timer(fired.clone(), 10);

    facade.run_all_timers().unwrap();
    assert_eq!(fired.as_mock().unwrap().call_count(), 1);

    facade.use_real_timers().clear_all_timers();
    assert_eq!(
        runtime.environment().fake_timers().pending_timer_count(),
        0
    );
}

#[test]
fn gen_mock_from_module_skips_the_mock_registry() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("u.js", "exports.k = function() { return 7; };\n");
    let runtime = fx.runtime();
    let facade = runtime.create_facade(&entry);

    let first = facade.gen_mock_from_module("./u").unwrap();
    let second = facade.gen_mock_from_module("./u").unwrap();
    assert!(first.get("k").as_mock().is_some());
    // Regenerated each call: distinct mock values, not the cached mock.
    assert_ne!(first, second);

    // An oracle-routed require with automock off still loads the real
    // module, untouched by the generation above.
    let real = runtime.require(&entry, "./u").unwrap();
    assert_eq!(real.get("k").call(&[]).unwrap(), Value::Number(7.0));
}

#[test]
fn deep_unmock_exempts_the_subtree() {
    let fx = Fixture::new();
    let a = fx.file(
        "p/node_modules/pkga/index.js",
        "exports.name = 'pkga';\n",
    );
    fx.file("p/node_modules/pkgb/index.js", "exports.name = 'pkgb';\n");
    let entry = fx.path("p/t.js");
    let runtime = fx.runtime_with(|config| config.automock = true);
    let facade = runtime.create_facade(&entry);

    facade.deep_unmock("pkga");
    assert!(!runtime.should_mock(&entry, "pkga").unwrap());
    assert!(
        !runtime.should_mock(&a, "pkgb").unwrap(),
        "subtree of a deep-unmocked module stays real"
    );
}

#[test]
fn current_executing_path_is_restored_after_load() {
    let fx = Fixture::new();
    let entry = fx.path("x.js");
    fx.file("b.js", "module.exports = { n: 1 };\n");
    let runtime = fx.runtime();

    assert!(runtime.current_executing_path().is_none());
    let _ = runtime.require(&entry, "./b").unwrap();
    assert!(runtime.current_executing_path().is_none());
}
