use rowjinja::{coerce, Environment, RenderContext, RenderError, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn context(pairs: &[(&str, Value)]) -> Rc<RenderContext> {
    RenderContext::new(Rc::new(Environment::new()), vars(pairs))
}

#[test]
fn coercion_rules() {
    assert_eq!(coerce("plain", "plain".into()), Value::from("plain"));
    assert_eq!(coerce("{{ 1 }}", "1".into()), Value::Int(1));
    assert_eq!(coerce("{{ x }}", "true".into()), Value::Bool(true));
    assert_eq!(
        coerce("{{ x }}", "[1,2]".into()),
        Value::Array(vec![Value::Int(1), Value::Int(2)])
    );
    // anything that isn't a literal stays the rendered text, untrimmed
    assert_eq!(coerce("{{ x }}", " hello world ".into()), Value::from(" hello world "));
}

#[test]
fn forward_reference_resolves_and_memoizes() {
    let ctx = context(&[("a", Value::from("{{ b }}")), ("b", Value::from("5"))]);
    assert_eq!(ctx.get("a").unwrap(), Value::Int(5));
    assert!(ctx.vars().is_resolved("a"));
    // `b` has no template markup, so it was a literal string all along
    assert_eq!(ctx.get("b").unwrap(), Value::from("5"));
}

#[test]
fn chained_templates_in_any_order() {
    let ctx = context(&[
        ("full", Value::from("{{ first }} {{ last }}")),
        ("first", Value::from("{{ given | title }}")),
        ("given", Value::from("ada")),
        ("last", Value::from("Lovelace")),
        ("greeting", Value::from("Hello {{ full }}!")),
    ]);
    assert_eq!(ctx.render("{{ greeting }}").unwrap(), "Hello Ada Lovelace!");
    assert!(ctx.vars().is_resolved("full"));
    assert!(ctx.vars().is_resolved("first"));
}

#[test]
fn each_template_renders_at_most_once() {
    let calls = Rc::new(Cell::new(0));
    let mut env = Environment::new();
    let counter = calls.clone();
    env.add_filter("tick", move |v, _, _| {
        counter.set(counter.get() + 1);
        Ok(v)
    });
    let ctx = RenderContext::new(
        Rc::new(env),
        vars(&[
            ("x", Value::from("{{ 7 | tick }}")),
            ("y", Value::from("{{ x }}-{{ x }}")),
        ]),
    );
    assert_eq!(ctx.render("{{ x }} {{ y }} {{ x }}").unwrap(), "7 7-7 7");
    assert_eq!(calls.get(), 1);
}

#[test]
fn literal_values_are_stable() {
    let ctx = context(&[("n", Value::Int(3)), ("list", Value::Array(vec![Value::from("a")]))]);
    assert_eq!(ctx.get("n").unwrap(), Value::Int(3));
    assert_eq!(ctx.get("n").unwrap(), Value::Int(3));
    assert_eq!(ctx.render("{{ list[0] }}{{ n * 2 }}").unwrap(), "a6");
}

#[test]
fn mutual_reference_is_a_cycle() {
    let ctx = context(&[("a", Value::from("{{ b }}")), ("b", Value::from("{{ a }}"))]);
    let err = ctx.render("{{ a }}").unwrap_err();
    assert!(
        matches!(err.root_cause(), RenderError::CyclicReference(name) if name == "a"),
        "{}",
        err
    );
    // a failed resolution leaves the entries readable again, still failing the same way
    assert!(!ctx.vars().is_resolved("a"));
    assert!(ctx.get("b").is_err());
}

#[test]
fn failure_names_the_variable_chain() {
    let ctx = context(&[
        ("outer", Value::from("{{ inner }}")),
        ("inner", Value::from("{{ nowhere }}")),
    ]);
    let err = ctx.get("outer").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("'outer'"), "{}", text);
    assert!(text.contains("'inner'"), "{}", text);
    assert!(matches!(err.root_cause(), RenderError::Undefined(n) if n == "nowhere"));
}

#[test]
fn nested_mappings_resolve_against_the_whole_context() {
    let mut db = BTreeMap::new();
    db.insert("host".to_string(), Value::from("{{ site }}.example.org"));
    db.insert("port".to_string(), Value::from("{{ 5000 + offset }}"));
    let ctx = context(&[
        ("site", Value::from("eu")),
        ("offset", Value::Int(432)),
        ("db", Value::Map(db)),
        ("url", Value::from("{{ db.host }}:{{ db['port'] }}")),
    ]);
    assert_eq!(ctx.get("url").unwrap(), Value::from("eu.example.org:5432"));
    assert_eq!(ctx.render("{{ db.port + 1 }}").unwrap(), "5433");
}

#[test]
fn set_replaces_an_entry() {
    let ctx = context(&[("a", Value::from("{{ b }}")), ("b", Value::Int(1))]);
    ctx.vars().set("b", Value::from("{{ 41 + 1 }}"));
    assert_eq!(ctx.get("a").unwrap(), Value::Int(42));
    assert!(ctx.vars().contains("b"));
    assert_eq!(ctx.vars().keys(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn loop_variables_shadow_lazy_ones() {
    let ctx = context(&[
        ("item", Value::from("{{ 'lazy' }}")),
        ("items", Value::from("{{ [1, 2] }}")),
    ]);
    assert_eq!(
        ctx.render("{% for item in items %}{{ item }}{% endfor %} {{ item }}").unwrap(),
        "12 lazy"
    );
}

#[test]
fn globals_shadow_lazy_ones() {
    let mut env = Environment::new();
    env.add_global("version", "1.0");
    let ctx = RenderContext::new(Rc::new(env), vars(&[("version", Value::from("{{ 2 }}"))]));
    assert_eq!(ctx.render("{{ version }}").unwrap(), "1.0");
}
