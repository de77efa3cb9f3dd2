//! End-to-end tests for the fly rule engine.
//!
//! Each test goes through the public API: decode rules -> build a pipe ->
//! process records -> verify the survivors.

use std::thread;

use fly_pipe::{
    apply, check_key, convert, validate, AttributeAccessor, Attributes, Condition, MapRecord,
    MappingAccessor, MatchOperator, Mode, Pipe, Rule, Severity, ValueType,
};
use fly_types::{FlyError, Result, Value};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record(json: serde_json::Value) -> MapRecord {
    json.as_object()
        .expect("record fixture must be an object")
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v)))
        .collect()
}

fn host() -> MapRecord {
    record(json!({"hostname": "mail.ru", "protocol": "http", "status": 1}))
}

fn rule(json: serde_json::Value) -> Rule {
    Rule::from_json(&json).expect("rule fixture must decode")
}

/// A record with fixed attributes rather than free-form keys.
#[derive(Debug, Clone, Default, PartialEq)]
struct Connection {
    hostname: Option<String>,
    protocol: Option<String>,
    status: Option<i64>,
}

impl Attributes for Connection {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "hostname" => self.hostname.clone().map(Value::Str),
            "protocol" => self.protocol.clone().map(Value::Str),
            "status" => self.status.map(Value::Int),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<()> {
        match (name, value) {
            ("hostname", Value::Str(s)) => self.hostname = Some(s),
            ("protocol", Value::Str(s)) => self.protocol = Some(s),
            ("status", Value::Int(i)) => self.status = Some(i),
            (name, value) => {
                return Err(FlyError::Attribute {
                    field: name.to_string(),
                    message: format!("cannot hold {}", value.kind()),
                })
            }
        }
        Ok(())
    }

    fn remove_attribute(&mut self, name: &str) {
        match name {
            "hostname" => self.hostname = None,
            "protocol" => self.protocol = None,
            "status" => self.status = None,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn or_hostname_and_protocol_sets_integer_status() {
    let r = rule(json!({
        "match": {
            "hostname": {"mode": "or", "conditions": [["endswith", ".ru"], ["endswith", ".com"]]},
            "protocol": {"conditions": [["exact", "http"]]}
        },
        "alter": {"set": {"status": {"value": "0", "type": "int"}}}
    }));

    let out = apply(&MappingAccessor, host(), &r).unwrap().unwrap();
    assert_eq!(out["status"], Value::Int(0));
    assert_eq!(out["hostname"], Value::from("mail.ru"));
}

#[test]
fn iexact_then_drop_all_deletes() {
    let r = rule(json!({
        "match": {"hostname": {"conditions": [["iexact", "MAIL.RU"]]}},
        "alter": {"drop": "ALL"}
    }));
    assert_eq!(apply(&MappingAccessor, host(), &r).unwrap(), None);
}

#[test]
fn lower_priority_runs_first_then_deletes() {
    // Declared out of order on purpose.
    let pipe = Pipe::from_value(&json!([
        {
            "priority": 1,
            "match": {"status": {"conditions": [["gt", 0]]}},
            "alter": {"drop": "ALL"}
        },
        {
            "priority": 0,
            "alter": {"incr": {"status": {"value": 1}}}
        }
    ]))
    .unwrap();

    let mut start = host();
    start.insert("status".into(), Value::Int(0));

    // Priority 0 alone leaves status == 1.
    let first = apply(&MappingAccessor, start.clone(), &pipe.rules()[0]).unwrap().unwrap();
    assert_eq!(first["status"], Value::Int(1));

    assert_eq!(pipe.process(&MappingAccessor, start).unwrap(), None);
}

#[test]
fn drop_all_overrides_other_groups() {
    let pipe = Pipe::new(vec![
        rule(json!({"alter": {"set": {"status": {"value": 5}}, "drop": "ALL"}})),
        rule(json!({"priority": 10, "alter": {"set": {"seen": {"value": true}}}})),
    ]);
    assert_eq!(pipe.process(&MappingAccessor, host()).unwrap(), None);
}

#[test]
fn rule_set_reused_across_records() {
    let pipe = Pipe::from_json(
        r#"[{"match": {"hostname": {"conditions": [["endswith", ".ru"]]}},
             "alter": {"append": {"tags": {"value": "ru"}}}}]"#,
    )
    .unwrap();

    for _ in 0..3 {
        let out = pipe.process(&MappingAccessor, host()).unwrap().unwrap();
        assert_eq!(out["tags"], Value::from("ru"));
    }
    let other = record(json!({"hostname": "ya.com"}));
    let out = pipe.process(&MappingAccessor, other.clone()).unwrap().unwrap();
    assert_eq!(out, other);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn exact_matches_iff_converted_values_equal() {
    let cases = [
        (Value::Int(5), Value::from("5"), Some(ValueType::Int), true),
        (Value::from("5.0"), Value::Int(5), Some(ValueType::Float), true),
        (Value::from("abc"), Value::from("abd"), None, false),
        (Value::from("2013-06-01"), Value::from("2013-06-01"), Some(ValueType::Date), true),
    ];
    for (field, literal, vt, expected) in cases {
        let conds = vec![Condition::new(MatchOperator::Exact, literal.clone())];
        let matched = check_key(&field, &conds, Mode::And, vt.as_ref(), None).unwrap();
        let equal = convert(&field, vt.as_ref(), None).unwrap()
            == convert(&literal, vt.as_ref(), None).unwrap();
        assert_eq!(matched, equal);
        assert_eq!(matched, expected, "{field} vs {literal}");
    }
}

#[test]
fn case_insensitive_operators_ignore_case_on_both_sides() {
    let ops = [
        (MatchOperator::IExact, "Mail.Ru"),
        (MatchOperator::IStartsWith, "MAIL"),
        (MatchOperator::IEndsWith, ".RU"),
        (MatchOperator::IContains, "L.r"),
    ];
    for (op, needle) in ops {
        assert!(op.evaluate(&Value::from("mAIL.rU"), &Value::from(needle)).unwrap(), "{op}");
    }
}

#[test]
fn datetime_round_trips_through_format() {
    let format = "%d/%m/%Y %H:%M";
    let text = "01/06/2013 12:30";
    let converted = convert(&Value::from(text), Some(&ValueType::DateTime), Some(format)).unwrap();
    let Value::DateTime(dt) = &converted else {
        panic!("expected a datetime, got {converted:?}");
    };
    assert_eq!(dt.format(format).to_string(), text);
}

// ---------------------------------------------------------------------------
// Record kinds and policies
// ---------------------------------------------------------------------------

#[test]
fn attribute_records_go_through_the_same_rules() {
    let pipe = Pipe::new(vec![
        rule(json!({
            "match": {"hostname": {"conditions": [["endswith", ".ru"]]}},
            "alter": {"set": {"status": {"value": "0", "type": "int"}}, "default": {"protocol": {"value": "https"}}}
        })),
        rule(json!({"priority": 1, "alter": {"drop": ["hostname"]}})),
    ]);
    let accessor = AttributeAccessor::<Connection>::new();
    let conn = Connection {
        hostname: Some("mail.ru".into()),
        protocol: None,
        status: Some(1),
    };

    let out = pipe.process(&accessor, conn).unwrap().unwrap();
    assert_eq!(
        out,
        Connection {
            hostname: None,
            protocol: Some("https".into()),
            status: Some(0),
        }
    );
}

#[test]
fn attribute_write_errors_propagate() {
    let accessor = AttributeAccessor::<Connection>::new();
    let r = rule(json!({"alter": {"set": {"status": {"value": "high"}}}}));
    let err = apply(&accessor, Connection::default(), &r).unwrap_err();
    assert!(matches!(err, FlyError::Attribute { .. }));
    assert!(!err.is_configuration_error());
}

#[test]
fn missing_fields_use_operator_identity() {
    let r = rule(json!({"alter": {
        "incr": {"hits": {"value": 2}},
        "decr": {"credit": {"value": 3}},
        "append": {"suffix": {"value": "x"}},
        "prepend": {"tags": {"value": 1}},
        "replace": {"body": {"value": "a", "replacement": "b"}}
    }}));
    let out = apply(&MappingAccessor, host(), &r).unwrap().unwrap();
    assert_eq!(out["hits"], Value::Int(2));
    assert_eq!(out["credit"], Value::Int(-3));
    assert_eq!(out["suffix"], Value::from("x"));
    assert_eq!(out["tags"], Value::from(vec![Value::Int(1)]));
    assert!(!out.contains_key("body"));
}

#[test]
fn unknown_type_passes_values_through() {
    let rules = vec![rule(json!({
        "match": {"status": {"conditions": [["exact", 1]], "type": "integer"}},
        "alter": {"set": {"matched": {"value": true}}}
    }))];

    let diags = validate(&rules);
    assert!(diags
        .iter()
        .any(|d| d.rule == "unknown_value_type" && d.severity == Severity::Warning));

    let out = Pipe::new(rules).process(&MappingAccessor, host()).unwrap().unwrap();
    assert_eq!(out["matched"], Value::Bool(true));
}

#[test]
fn emptied_record_ends_processing() {
    let pipe = Pipe::new(vec![
        rule(json!({"alter": {"drop": ["hostname", "protocol", "status"]}})),
        rule(json!({"priority": 1, "alter": {"set": {"revived": {"value": 1}}}})),
    ]);
    assert_eq!(pipe.process(&MappingAccessor, host()).unwrap(), None);
}

#[test]
fn decode_errors_are_configuration_errors() {
    let err = Pipe::from_value(&json!([{"match": {"hostname": {"conditions": [["like", "x"]]}}}]))
        .unwrap_err();
    assert!(matches!(err, FlyError::UnsupportedOperator { ref operator } if operator == "like"));
    assert!(err.is_configuration_error());

    let err = Pipe::from_value(&json!({"alter": {"multiply": {}}})).unwrap_err();
    assert!(matches!(err, FlyError::UnknownOperator { .. }));
}

#[test]
fn conversion_errors_surface_per_record() {
    let pipe = Pipe::new(vec![rule(json!({
        "match": {"status": {"conditions": [["gte", 1]], "type": "int"}}
    }))]);
    let bad = record(json!({"status": "one"}));
    let err = pipe.process(&MappingAccessor, bad).unwrap_err();
    assert!(matches!(err, FlyError::Conversion { .. }));
    assert!(!err.is_configuration_error());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn one_pipe_serves_many_threads() {
    let pipe = Pipe::from_value(&json!([
        {"priority": 0, "alter": {"incr": {"status": {"value": 1}}}},
        {"priority": 1,
         "match": {"status": {"conditions": [["gt", 10]]}},
         "alter": {"drop": "ALL"}}
    ]))
    .unwrap();

    let survivors: Vec<usize> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let pipe = &pipe;
                scope.spawn(move || {
                    (0..20)
                        .map(|n| record(json!({"worker": worker, "status": n})))
                        .filter_map(|r| pipe.process(&MappingAccessor, r).unwrap())
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Statuses 0..=9 become 1..=10 and survive; the rest are dropped.
    assert_eq!(survivors, vec![10; 4]);
    assert_eq!(pipe.len(), 2);
}
