use super::*;
use crate::args;

fn rendered(cond: &ConditionBuilder) -> String {
    cond.render(None, &[]).0
}

#[test]
fn fold_on_switch_parenthesizes_multiple_fragments() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("a", args![])
        .unwrap()
        .add_and("b", args![])
        .unwrap()
        .add_or("c", args![])
        .unwrap();
    assert_eq!(rendered(&cond), "(a AND b) OR c");
}

#[test]
fn fold_on_switch_single_fragment_has_no_parens() {
    let mut cond = ConditionBuilder::new();
    cond.add_or("a", args![]).unwrap().add_and("b", args![]).unwrap();
    assert_eq!(rendered(&cond), "a AND b");
}

#[test]
fn repeated_switches_nest_groups() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("a", args![]).unwrap();
    cond.add_and("b", args![]).unwrap();
    cond.add_or("c", args![]).unwrap();
    cond.add_and("d", args![]).unwrap();
    assert_eq!(rendered(&cond), "((a AND b) OR c) AND d");
}

#[test]
fn list_value_becomes_in_clause_with_one_parameter() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("tags", args![vec![1, 2, 3]]).unwrap();

    let (text, values) = cond.render(None, &[]);
    assert_eq!(text, "tags IN (?)");
    assert_eq!(values, vec![Value::from(vec![1, 2, 3])]);

    let mut sink = Parameters::new();
    let sql = cond.build(None, &[], &mut sink).unwrap().unwrap();
    assert!(sql.starts_with("tags IN (:param_"));
    assert_eq!(sink.len(), 1);
    let param = sink.iter().next().unwrap();
    assert_eq!(param.value, Value::from(vec![1, 2, 3]));
    assert_eq!(param.param_type, Some(crate::value::ParamType::StringArray));
}

#[test]
fn null_value_becomes_is_null_without_parameter() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("deletedAt", args![Value::Null]).unwrap();

    let mut sink = Parameters::new();
    let sql = cond.build(None, &[], &mut sink).unwrap().unwrap();
    assert_eq!(sql, "deletedAt IS NULL");
    assert!(sink.is_empty());
}

#[test]
fn scalar_value_becomes_equality() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("name", args!["alice"]).unwrap();
    assert_eq!(cond.render(None, &[]).0, "name = ?");
}

#[test]
fn empty_list_is_rejected() {
    let mut cond = ConditionBuilder::new();
    let err = cond.add_and("tags", args![Vec::<i32>::new()]).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn placeholders_take_values_verbatim() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("e.age BETWEEN ? AND ?", args![18, 65]).unwrap();
    cond.add_and("e.name = :name", args!["bob"]).unwrap();

    let mut sink = Parameters::new();
    let sql = cond.build(None, &[], &mut sink).unwrap().unwrap();

    assert!(sql.starts_with("(e.age BETWEEN :param_"));
    assert!(sql.ends_with(") AND e.name = :name"));
    assert_eq!(sink.len(), 3);
    assert_eq!(sink.get("name").unwrap().value, Value::from("bob"));
}

#[test]
fn top_level_logic_in_leaf_is_wrapped_only_when_joined() {
    let mut single = ConditionBuilder::new();
    single.add_and("a = 1 OR b = 2", args![]).unwrap();
    assert_eq!(rendered(&single), "a = 1 OR b = 2");

    let mut joined = ConditionBuilder::new();
    joined.add_and("a = 1 OR b = 2", args![]).unwrap();
    joined.add_and("c = 3", args![]).unwrap();
    assert_eq!(rendered(&joined), "(a = 1 OR b = 2) AND c = 3");
}

#[test]
fn keywords_inside_literals_do_not_force_parens() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("name = 'BRANDOR'", args![]).unwrap();
    cond.add_and("LOWER(x) = 'a or b'", args![]).unwrap();
    assert_eq!(rendered(&cond), "name = 'BRANDOR' AND LOWER(x) = 'a or b'");
}

#[test]
fn column_maps_are_combined_with_call_mode() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("active = 1", args![]).unwrap();
    cond.add_or_all(vec![("role", "admin"), ("role2", "owner")]).unwrap();
    assert_eq!(rendered(&cond), "active = 1 OR role = ? OR role2 = ?");
}

#[test]
fn nested_group_is_parenthesized() {
    let mut inner = ConditionBuilder::new();
    inner.add_or("a = 1", args![]).unwrap().add_or("b = 2", args![]).unwrap();

    let mut outer = ConditionBuilder::new();
    outer.add_and("c = 3", args![]).unwrap();
    outer.add_group(Mode::And, inner);
    assert_eq!(rendered(&outer), "c = 3 AND (a = 1 OR b = 2)");
}

#[test]
fn single_fragment_group_keeps_its_precedence() {
    let mut inner = ConditionBuilder::new();
    inner.add_or("a = 1 OR b = 2", args![]).unwrap();

    let mut outer = ConditionBuilder::new();
    outer.add_and("x = 1", args![]).unwrap();
    outer.add_group(Mode::And, inner);
    assert_eq!(rendered(&outer), "x = 1 AND (a = 1 OR b = 2)");

    let mut nested = ConditionBuilder::new();
    nested.add_and("y = 2", args![]).unwrap();
    nested.add_group(Mode::Or, outer);
    assert_eq!(rendered(&nested), "y = 2 OR (x = 1 AND (a = 1 OR b = 2))");
}

#[test]
fn doubled_quotes_stay_inside_the_literal() {
    assert!(!has_top_level_logic("name = 'it''s AND more'"));
    assert!(has_top_level_logic("name = 'it''s' OR id = 1"));

    let mut cond = ConditionBuilder::new();
    cond.add_and("name = 'it''s AND more'", args![]).unwrap();
    cond.add_and("id = ?", args![1]).unwrap();
    assert_eq!(rendered(&cond), "name = 'it''s AND more' AND id = ?");
    assert_eq!(
        prefix_aliases("name = 'it''s AND more'", "u", &[]),
        "u.name = 'it''s AND more'"
    );
    assert_eq!(scan_placeholders("x = 'it''s ?' AND y = ?").len(), 1);
}

#[test]
fn alias_is_applied_when_rendering() {
    let mut cond = ConditionBuilder::new();
    cond.add_and("name", args!["x"]).unwrap();
    cond.add_and("a.title IS NOT NULL", args![]).unwrap();
    assert_eq!(
        cond.render(Some("e"), &["a"]).0,
        "e.name = ? AND a.title IS NOT NULL"
    );
}

#[test]
fn generated_names_do_not_collide_across_builders() {
    let mut where_ = ConditionBuilder::new();
    where_.add_and("x = ?", args![1]).unwrap();
    let mut having = ConditionBuilder::new();
    having.add_and("x = ?", args![2]).unwrap();

    let mut sink = Parameters::new();
    let w = where_.build(None, &[], &mut sink).unwrap().unwrap();
    let h = having.build(None, &[], &mut sink).unwrap().unwrap();

    assert_ne!(w, h);
    assert_eq!(sink.len(), 2);
}

#[test]
fn clones_are_independent() {
    let mut original = ConditionBuilder::new();
    original.add_and("a", args![]).unwrap();
    let mut copy = original.clone();
    copy.add_and("b", args![]).unwrap();
    assert_eq!(rendered(&original), "a");
    assert_eq!(rendered(&copy), "a AND b");
}
