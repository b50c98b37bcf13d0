//! Converter pipeline tests.
//!
//! Memoization, dependency ordering, cycle detection and cache invalidation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use option_merge::{
    from_fn, Converters, Field, FormatStrings, MergedOptions, OverlayError, Path, RecordSpec,
    Registration, Value,
};
use serde_json::json;

fn v(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn upper() -> impl option_merge::Converter {
    from_fn(|_, value| Ok(Value::from(value.to_string().to_uppercase())))
}

// =============================================================================
// Memoization
// =============================================================================

#[test]
fn test_converter_invoked_once() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let options = MergedOptions::using([v(json!({"name": "web"}))], "test");
    options
        .add_converter(Registration::new(
            "name",
            from_fn(move |_, value| {
                counter.set(counter.get() + 1);
                Ok(Value::from(format!("{}-1", value)))
            }),
        ))
        .unwrap();

    let first = options.get_converted("name").unwrap();
    let second = options.prefixed("name").as_mapping().unwrap();
    assert_eq!(first, Value::from("web-1"));
    assert_eq!(first, second);
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_cache_shared_between_views() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let options = MergedOptions::using([v(json!({"a": {"b": "x"}}))], "test");
    options
        .add_converter(Registration::new(
            "a.b",
            from_fn(move |_, value| {
                counter.set(counter.get() + 1);
                Ok(value)
            }),
        ))
        .unwrap();

    let a = options.prefixed("a");
    a.get_converted("b").unwrap();
    options.get_converted("a.b").unwrap();
    options.as_mapping().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_delete_reconverts_revealed_value() {
    let options = MergedOptions::using([v(json!({"a": {"b": "one"}})), v(json!({"a": {"b": "two"}}))], "test");
    options.add_converter(Registration::new("a.b", upper())).unwrap();

    assert_eq!(options.get_converted("a.b").unwrap(), Value::from("TWO"));
    options.prefixed("a").delete("b").unwrap();
    assert_eq!(options.get_converted("a.b").unwrap(), Value::from("ONE"));
}

#[test]
fn test_delete_of_ancestor_or_descendant_drops_cached_conversions() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let options = MergedOptions::using(
        [
            v(json!({"a": {"b": {"c": "old"}}})),
            v(json!({"a": {"b": {"c": "new"}}})),
        ],
        "test",
    );
    options
        .add_converter(Registration::new(
            "a.b",
            from_fn(move |_, value| {
                counter.set(counter.get() + 1);
                Ok(value)
            }),
        ))
        .unwrap();

    assert_eq!(options.get_converted("a.b").unwrap(), v(json!({"c": "new"})));
    options.delete("a.b.c").unwrap();
    assert_eq!(options.get_converted("a.b").unwrap(), v(json!({"c": "old"})));
    assert_eq!(calls.get(), 2);

    options.update(v(json!({"a": {"b": {"c": "newest"}}})), "later");
    assert_eq!(options.get_converted("a.b").unwrap(), v(json!({"c": "old"})));
    options.delete("a").unwrap();
    assert_eq!(options.get_converted("a.b").unwrap(), v(json!({"c": "old"})));
    assert_eq!(calls.get(), 3);
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_resolve_all_runs_dependencies_first() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let options = MergedOptions::using(
        [v(json!({"images": {"base": 1, "app": 2}, "tasks": {"build": 3}}))],
        "test",
    );

    let record = |name: &'static str| {
        let seen = Rc::clone(&seen);
        from_fn(move |ctx, value| {
            seen.borrow_mut().push(format!("{}:{}", name, ctx.path()));
            Ok(value)
        })
    };

    options
        .add_converter(Registration::new("tasks.*", record("tasks")).after_all_in("images"))
        .unwrap();
    options
        .add_converter(Registration::new("images.app", record("app")).after("images.base"))
        .unwrap();
    options
        .add_converter(Registration::new("images.base", record("base")))
        .unwrap();

    options.resolve_all().unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![
            "base:images.base".to_string(),
            "app:images.app".to_string(),
            "tasks:tasks.build".to_string(),
        ]
    );
}

#[test]
fn test_children_pattern_and_exact_override() {
    let options = MergedOptions::using([v(json!({"env": {"a": "x", "b": "y"}}))], "test");
    options
        .add_converter(Registration::new("env.*", upper()))
        .unwrap();
    options
        .add_converter(Registration::new(
            "env.b",
            from_fn(|_, value| Ok(Value::from(format!("<{}>", value)))),
        ))
        .unwrap();

    assert_eq!(
        options.as_mapping().unwrap(),
        v(json!({"env": {"a": "X", "b": "<y>"}}))
    );
}

// =============================================================================
// Cycles
// =============================================================================

#[test]
fn test_cyclic_dependency_rejected_at_registration() {
    let options = MergedOptions::new();
    options
        .add_converter(Registration::new("a", upper()).after("b"))
        .unwrap();

    let err = options
        .add_converter(Registration::new("b", upper()).after("a"))
        .unwrap_err();
    match err {
        OverlayError::CyclicDependency { chain } => assert_eq!(chain, vec!["a", "b", "a"]),
        other => panic!("unexpected {:?}", other),
    }

    let mut converters = Converters::new();
    converters
        .register(Registration::new("x.*", upper()).after("x.y"))
        .unwrap_err();
    assert!(converters.is_empty());
}

#[test]
fn test_cyclic_conversion_fails_fast() {
    let options = MergedOptions::using([v(json!({"a": 1}))], "test");
    options
        .add_converter(Registration::new(
            "a",
            from_fn(|ctx, _| {
                let whole = ctx.options().as_mapping()?;
                Ok(whole)
            }),
        ))
        .unwrap();

    let err = options.get_converted("a").unwrap_err();
    match err {
        OverlayError::CyclicConversion { path, .. } => {
            assert_eq!(path, Path::from_segments(["a"]));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        options.get_converted("a").unwrap_err(),
        OverlayError::CyclicConversion { .. }
    ));
}

#[test]
fn test_conversion_failure_carries_path() {
    let options = MergedOptions::using([v(json!({"limits": {"cpu": "lots"}}))], "test");
    options
        .add_converter(Registration::new(
            "limits.cpu",
            from_fn(|_, value| Ok(Value::Integer(value.to_string().parse()?))),
        ))
        .unwrap();

    let err = options.as_mapping().unwrap_err();
    assert!(err.to_string().starts_with("Conversion failed at limits.cpu:"));
}

// =============================================================================
// Record and formatting converters
// =============================================================================

#[test]
fn test_record_with_formatted_fields() {
    let options = MergedOptions::using(
        [v(json!({
            "domain": "example.com",
            "site": {"url": "https://{domain}/", "title": "Home", "junk": true}
        }))],
        "test",
    );
    let spec = RecordSpec::builder()
        .field(Field::required("url").with(FormatStrings::new()))
        .field(Field::optional("title"))
        .field(Field::optional("retries").default_value(3))
        .build();
    options.add_converter(Registration::new("site", spec)).unwrap();

    assert_eq!(
        options.get_converted("site").unwrap(),
        v(json!({"url": "https://example.com/", "title": "Home", "retries": 3}))
    );
}
