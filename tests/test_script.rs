use osm_tags_transform::script::CallingContext;
use osm_tags_transform::*;

fn node(id: i64, tags: &[(&str, &str)]) -> OsmElement {
    OsmElement::Node(OsmNode {
        id,
        info: Attribution {
            version: 3,
            changeset: 42,
            timestamp: 1_600_000_000_000,
            uid: 7,
            user: "mapper".to_string(),
        },
        lat: 2.5,
        lon: 1.5,
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    })
}

fn call_node(script: &ScriptBinding, element: &OsmElement, bbox: &BoundingBox) -> Result<Decision> {
    let callback = script
        .callback(ElementKind::Node)
        .expect("process_node should be bound");
    script.call(callback, element, bbox)
}

fn sorted(decision: Decision) -> Tags {
    match decision {
        Decision::Replace(mut tags) => {
            tags.sort();
            tags
        }
        other => panic!("expected a tags table, got {:?}", other),
    }
}

fn tag(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[test]
fn test_no_callbacks() {
    let script = ScriptBinding::from_source("-- nothing here", "empty").unwrap();
    assert!(script.bound_names().is_empty());
    assert!(script.callback(ElementKind::Node).is_none());
    assert!(script.callback(ElementKind::Way).is_none());
    assert!(script.callback(ElementKind::Relation).is_none());
}

#[test]
fn test_bound_callbacks() {
    let source = r#"
        function ott.process_way(o) return true end
        ott.process_relation = function(o) return false end
    "#;
    let script = ScriptBinding::from_source(source, "bound").unwrap();
    assert_eq!(script.bound_names(), vec!["process_way", "process_relation"]);

    let way = script.callback(ElementKind::Way).unwrap();
    assert_eq!(way.name(), "process_way");
    assert_eq!(way.context(), CallingContext::ProcessWay);
    assert_eq!(way.nresults(), 1);
}

#[test]
fn test_non_callable_binding() {
    let err = ScriptBinding::from_source("ott.process_node = 5", "bad").err().unwrap();
    assert!(matches!(err, Error::NotCallable("process_node")));
    assert_eq!(err.to_string(), "ott.process_node must be a function.");
}

#[test]
fn test_namespace_replaced() {
    let err = ScriptBinding::from_source("ott = 1", "bad").err().unwrap();
    assert!(matches!(err, Error::MissingNamespace));
}

#[test]
fn test_malformed_script() {
    let err = ScriptBinding::from_source("function ott.process_node(", "broken")
        .err()
        .unwrap();
    assert!(matches!(err, Error::ScriptLoad(_)));
    assert!(err.to_string().starts_with("Error loading lua config"));
}

#[test]
fn test_missing_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ScriptBinding::load(&dir.path().join("missing.lua"))
        .err()
        .unwrap();
    assert!(matches!(err, Error::ScriptLoad(_)));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keep.lua");
    std::fs::write(&path, "function ott.process_node(o) return true end").unwrap();

    let script = ScriptBinding::load(&path).unwrap();
    let decision = call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap();
    assert_eq!(decision, Decision::Keep);
}

#[test]
fn test_decisions() {
    let source = r#"
        function ott.process_node(o)
            if o.tags.action == "keep" then return true end
            if o.tags.action == "drop" then return false end
            return { b = "2", a = "1" }
        end
    "#;
    let script = ScriptBinding::from_source(source, "decisions").unwrap();
    let bbox = BoundingBox::invalid();

    assert_eq!(
        call_node(&script, &node(1, &[("action", "keep")]), &bbox).unwrap(),
        Decision::Keep
    );
    assert_eq!(
        call_node(&script, &node(1, &[("action", "drop")]), &bbox).unwrap(),
        Decision::Drop
    );
    assert_eq!(
        sorted(call_node(&script, &node(1, &[("action", "other")]), &bbox).unwrap()),
        vec![tag("a", "1"), tag("b", "2")]
    );
}

#[test]
fn test_empty_table_clears_tags() {
    let script =
        ScriptBinding::from_source("function ott.process_node(o) return {} end", "clear").unwrap();
    let decision = call_node(&script, &node(1, &[("a", "1")]), &BoundingBox::invalid()).unwrap();
    assert_eq!(decision, Decision::Replace(Vec::new()));
}

#[test]
fn test_non_string_tag_entries() {
    let cases = [
        "return { a = 1 }",
        "return { a = true }",
        "return { 'positional' }",
        "return { a = {} }",
    ];
    for body in cases {
        let source = format!("function ott.process_node(o) {} end", body);
        let script = ScriptBinding::from_source(&source, "types").unwrap();
        let err = call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap_err();
        assert!(matches!(err, Error::InvalidTagType), "{}", body);
        assert_eq!(err.to_string(), "Keys and values in tags must be strings!");
    }
}

#[test]
fn test_unexpected_return() {
    for body in ["return nil", "return 'yes'", "return 1", ""] {
        let source = format!("function ott.process_node(o) {} end", body);
        let script = ScriptBinding::from_source(&source, "returns").unwrap();
        let err = call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedReturn), "{:?}", body);
    }
}

#[test]
fn test_extra_results_ignored() {
    let script = ScriptBinding::from_source(
        "function ott.process_node(o) return false, { a = '1' } end",
        "extra",
    )
    .unwrap();
    let decision = call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap();
    assert_eq!(decision, Decision::Drop);
}

#[test]
fn test_runtime_error_names_callback() {
    let script =
        ScriptBinding::from_source("function ott.process_node(o) error('boom') end", "err")
            .unwrap();
    let err = call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap_err();
    assert!(matches!(
        err,
        Error::ScriptCall {
            name: "process_node",
            ..
        }
    ));
    let message = err.to_string();
    assert!(message.contains("process_node"), "{}", message);
    assert!(message.contains("boom"), "{}", message);
}

#[test]
fn test_snapshot_fields() {
    let source = r#"
        function ott.process_node(o)
            local out = { id = tostring(o.id), name = o.tags.name }
            if o.bbox then
                out.bbox = string.format("%g,%g,%g,%g", table.unpack(o.bbox))
            else
                out.bbox = "none"
            end
            return out
        end
    "#;
    let script = ScriptBinding::from_source(source, "snapshot").unwrap();
    let element = node(17, &[("name", "Fountain")]);

    let without = sorted(call_node(&script, &element, &BoundingBox::invalid()).unwrap());
    assert_eq!(
        without,
        vec![tag("bbox", "none"), tag("id", "17"), tag("name", "Fountain")]
    );

    let bbox = BoundingBox::from_corners(Location::new(0.0, 0.0), Location::new(10.0, 10.0));
    let with = sorted(call_node(&script, &element, &bbox).unwrap());
    assert_eq!(with[0], tag("bbox", "0,0,10,10"));
}

#[test]
fn test_node_accessors() {
    let source = r#"
        function ott.process_node(o)
            local lon, lat = o:location()
            return {
                type = o:type(),
                context = o:context(),
                version = tostring(o:version()),
                changeset = tostring(o:changeset()),
                timestamp = tostring(o:timestamp()),
                uid = tostring(o:uid()),
                user = o:user(),
                location = string.format("%g %g", lon, lat),
                refs = tostring(o:node_refs()),
                members = tostring(o:members()),
            }
        end
    "#;
    let script = ScriptBinding::from_source(source, "accessors").unwrap();
    let tags = sorted(call_node(&script, &node(5, &[]), &BoundingBox::invalid()).unwrap());

    assert_eq!(
        tags,
        vec![
            tag("changeset", "42"),
            tag("context", "process_node"),
            tag("location", "1.5 2.5"),
            tag("members", "nil"),
            tag("refs", "nil"),
            tag("timestamp", "1600000000000"),
            tag("type", "node"),
            tag("uid", "7"),
            tag("user", "mapper"),
            tag("version", "3"),
        ]
    );
}

#[test]
fn test_way_and_relation_accessors() {
    let source = r#"
        function ott.process_way(o)
            local lon, lat = o:location()
            local refs = o:node_refs()
            return {
                type = o:type(),
                count = tostring(#refs),
                last = tostring(refs[#refs]),
                location = tostring(lon) .. " " .. tostring(lat),
            }
        end
        function ott.process_relation(o)
            local members = o:members()
            return {
                type = o:type(),
                count = tostring(#members),
                first = members[1].type .. "/" .. members[1].ref .. "/" .. members[1].role,
            }
        end
    "#;
    let script = ScriptBinding::from_source(source, "accessors").unwrap();
    let bbox = BoundingBox::invalid();

    let way = OsmElement::Way(OsmWay {
        id: 10,
        info: Attribution::default(),
        node_refs: vec![1, 2, 3],
        tags: Vec::new(),
    });
    let callback = script.callback(ElementKind::Way).unwrap();
    assert_eq!(
        sorted(script.call(callback, &way, &bbox).unwrap()),
        vec![
            tag("count", "3"),
            tag("last", "3"),
            tag("location", "nil nil"),
            tag("type", "way"),
        ]
    );

    let relation = OsmElement::Relation(OsmRelation {
        id: 20,
        info: Attribution::default(),
        members: vec![
            OsmRelationMember {
                member_type: ElementKind::Way,
                member_id: 10,
                role: "outer".to_string(),
            },
            OsmRelationMember {
                member_type: ElementKind::Node,
                member_id: 1,
                role: String::new(),
            },
        ],
        tags: Vec::new(),
    });
    let callback = script.callback(ElementKind::Relation).unwrap();
    assert_eq!(
        sorted(script.call(callback, &relation, &bbox).unwrap()),
        vec![
            tag("count", "2"),
            tag("first", "way/10/outer"),
            tag("type", "relation"),
        ]
    );
}

#[test]
fn test_accessors_invalid_after_call() {
    let source = r#"
        local saved
        function ott.process_node(o)
            if saved == nil then
                saved = o
                return true
            end
            local ok = pcall(function() return saved:type() end)
            return { still_valid = tostring(ok), id = tostring(saved.id) }
        end
    "#;
    let script = ScriptBinding::from_source(source, "saved").unwrap();
    let bbox = BoundingBox::invalid();

    assert_eq!(call_node(&script, &node(1, &[]), &bbox).unwrap(), Decision::Keep);
    assert_eq!(
        sorted(call_node(&script, &node(2, &[]), &bbox).unwrap()),
        vec![tag("id", "1"), tag("still_valid", "false")]
    );
}

#[test]
fn test_version_exposed() {
    let script =
        ScriptBinding::from_source("function ott.process_node(o) return { v = ott.version } end", "v")
            .unwrap();
    assert_eq!(
        sorted(call_node(&script, &node(1, &[]), &BoundingBox::invalid()).unwrap()),
        vec![tag("v", env!("CARGO_PKG_VERSION"))]
    );
}
