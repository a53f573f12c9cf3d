use rowjinja::{Environment, RenderError, Value};
use std::collections::{BTreeMap, HashMap};

fn message(role: &str, content: &str) -> Value {
    let mut m = BTreeMap::new();
    m.insert("role".to_string(), Value::from(role));
    m.insert("content".to_string(), Value::from(content));
    Value::Map(m)
}

fn messages(items: &[(&str, &str)]) -> HashMap<String, Value> {
    let list = items.iter().map(|(r, c)| message(r, c)).collect();
    let mut vars = HashMap::new();
    vars.insert("messages".to_string(), Value::Array(list));
    vars
}

fn render(template: &str, vars: &HashMap<String, Value>) -> String {
    Environment::new().render_str(template, vars).unwrap()
}

// ── Edge cases ──

#[test]
fn empty_loop_produces_empty_output() {
    let template = "{% for message in messages %}{{ message.content }}{% endfor %}";
    assert_eq!(render(template, &messages(&[])), "");
}

#[test]
fn plain_text_template_no_tags() {
    assert_eq!(render("Hello, world!", &HashMap::new()), "Hello, world!");
}

#[test]
fn variables_outside_loop() {
    let mut vars = HashMap::new();
    vars.insert("bos".to_string(), Value::from("<s>"));
    vars.insert("eos".to_string(), Value::from("</s>"));
    assert_eq!(render("{{ bos }}PROMPT{{ eos }}", &vars), "<s>PROMPT</s>");
}

#[test]
fn dot_access_and_bracket_access_equivalent() {
    let vars = messages(&[("user", "hi")]);
    let a = render("{% for message in messages %}{{ message.role }}{% endfor %}", &vars);
    let b = render("{% for message in messages %}{{ message['role'] }}{% endfor %}", &vars);
    assert_eq!(a, b);
    assert_eq!(a, "user");
}

#[test]
fn loop_first_and_last_single_item() {
    let template = "{% for message in messages %}{% if loop.first %}F{% endif %}{% if loop.last %}L{% endif %}{% endfor %}";
    assert_eq!(render(template, &messages(&[("user", "x")])), "FL");
}

#[test]
fn loop_first_and_last_multiple_items() {
    let template = "{% for message in messages %}{% if loop.first %}[{% endif %}{{ message.role }}{% if loop.last %}]{% endif %}{% endfor %}";
    let vars = messages(&[("a", ""), ("b", ""), ("c", "")]);
    assert_eq!(render(template, &vars), "[abc]");
}

#[test]
fn loop_counters() {
    let template = "{% for m in messages %}{{ loop.index }}/{{ loop.length }}:{{ loop.revindex0 }} {% endfor %}";
    let vars = messages(&[("a", ""), ("b", "")]);
    assert_eq!(render(template, &vars), "1/2:1 2/2:0 ");
}

#[test]
fn or_operator_in_condition() {
    let template = "{% for message in messages %}{% if message.role == 'user' or message.role == 'assistant' %}Y{% else %}N{% endif %}{% endfor %}";
    let vars = messages(&[("system", ""), ("user", ""), ("assistant", "")]);
    assert_eq!(render(template, &vars), "NYY");
}

#[test]
fn string_concat_multiple_parts() {
    let template = "{% for message in messages %}{{ 'A' + 'B' + 'C' + message.role + 'D' }}{% endfor %}";
    assert_eq!(render(template, &messages(&[("x", "")])), "ABCxD");
}

#[test]
fn tilde_concatenates_any_value() {
    let mut vars = HashMap::new();
    vars.insert("n".to_string(), Value::Int(3));
    assert_eq!(render("{{ 'n=' ~ n ~ ', ok=' ~ true }}", &vars), "n=3, ok=True");
}

#[test]
fn elif_chain_inside_for() {
    let template = "{% for message in messages %}{% if message.role == 'user' %}U{% elif message.role == 'system' %}S{% else %}O{% endif %}{% endfor %}";
    let vars = messages(&[("user", ""), ("system", ""), ("tool", "")]);
    assert_eq!(render(template, &vars), "USO");
}

#[test]
fn nested_loops() {
    let mut vars = HashMap::new();
    vars.insert(
        "grid".to_string(),
        Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
            Value::Array(vec![Value::Int(3)]),
        ]),
    );
    let template = "{% for row in grid %}{% for cell in row %}{{ cell }}{% endfor %};{% endfor %}";
    assert_eq!(render(template, &vars), "12;3;");
}

#[test]
fn special_characters_are_not_escaped() {
    let template = "{% for message in messages %}{{ message.content }}{% endfor %}";
    let vars = messages(&[("user", "Hello <world> & \"friends\"")]);
    assert_eq!(render(template, &vars), "Hello <world> & \"friends\"");
}

#[test]
fn unicode_content() {
    let template = "{% for message in messages %}{{ message.content }}{% endfor %}";
    let vars = messages(&[("user", "こんにちは 🌍")]);
    assert_eq!(render(template, &vars), "こんにちは 🌍");
}

#[test]
fn missing_flag_is_falsy_in_conditions() {
    let template = "{% for message in messages %}{{ message.role }}{% if loop.last and add_prompt %}PROMPT{% endif %}{% endfor %}";
    assert_eq!(render(template, &messages(&[("user", "")])), "user");
}

#[test]
fn missing_variable_fails_on_output() {
    let err = Environment::new()
        .render_str("Hi {{ who }}", &HashMap::new())
        .unwrap_err();
    assert!(matches!(err, RenderError::Undefined(ref n) if n == "who"), "{}", err);
}

#[test]
fn syntax_error_reports_line() {
    let err = Environment::new()
        .render_str("line one\n{% if x %}\nno end", &HashMap::new())
        .unwrap_err();
    assert!(matches!(err, RenderError::Syntax { .. }), "{}", err);
}

#[test]
fn structures_render_like_python() {
    let mut vars = HashMap::new();
    vars.insert(
        "items".to_string(),
        Value::Array(vec![Value::from("a"), Value::Int(1), Value::Null, Value::Float(2.0)]),
    );
    assert_eq!(render("{{ items }}", &vars), "['a', 1, None, 2.0]");
    assert_eq!(render("{{ {'k': 'v'} }}", &vars), "{'k': 'v'}");
}

// ── Whitespace handling with trim_blocks and lstrip_blocks ──

const CHAT: &str = r#"
{% for message in messages %}
{% if message['role'] == 'user' %}
{{ '<|user|>\n' + message['content'] + eos_token }}
{% elif message['role'] == 'system' %}
{{ '<|system|>\n' + message['content'] + eos_token }}
{% elif message['role'] == 'assistant' %}
{{ '<|assistant|>\n'  + message['content'] + eos_token }}
{% endif %}
{% if loop.last and add_generation_prompt %}
{{ '<|assistant|>' }}
{% endif %}
{% endfor %}
"#;

fn chat_vars(add_generation_prompt: bool) -> HashMap<String, Value> {
    let mut vars = messages(&[("system", "You are a friendly AI."), ("user", "Hello!")]);
    vars.insert("eos_token".to_string(), Value::from("</s>"));
    vars.insert("add_generation_prompt".to_string(), Value::Bool(add_generation_prompt));
    vars
}

#[test]
fn block_lines_leave_no_blank_lines() {
    let rendered = render(CHAT.trim(), &chat_vars(true));
    let expected = "<|system|>\nYou are a friendly AI.</s>\n<|user|>\nHello!</s>\n<|assistant|>\n";
    assert_eq!(rendered, expected);
}

#[test]
fn generation_prompt_flag_off() {
    let rendered = render(CHAT.trim(), &chat_vars(false));
    assert_eq!(rendered, "<|system|>\nYou are a friendly AI.</s>\n<|user|>\nHello!</s>\n");
}

#[test]
fn indented_block_tags_are_stripped() {
    let template = "<ul>\n  {% for m in messages %}\n  <li>{{ m.role }}</li>\n  {% endfor %}\n</ul>";
    let vars = messages(&[("a", ""), ("b", "")]);
    assert_eq!(render(template, &vars), "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>");
}

#[test]
fn whitespace_control_markers() {
    let mut vars = HashMap::new();
    vars.insert("x".to_string(), Value::from("X"));
    assert_eq!(render("a   {{- x -}}   b", &vars), "aXb");
}
