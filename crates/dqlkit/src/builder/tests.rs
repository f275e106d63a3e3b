use super::*;
use crate::args;

/// Replace minted `:param_<hash>_<n>` names with `:p<n>`.
fn normalized(dql: &str) -> String {
    let re = Regex::new(r":param_[0-9a-f]{8}_(\d+)").unwrap();
    re.replace_all(dql, ":p${1}").into_owned()
}

fn values(query: &BuiltQuery) -> Vec<Value> {
    query.parameters.iter().map(|p| p.value.clone()).collect()
}

#[test]
fn select_with_bare_columns_gets_root_alias() {
    let qb = DqlBuilder::new()
        .from("App\\User", "u")
        .where_("name", args!["alice"])
        .where_("age > ?", args![18])
        .order("created DESC, id");

    let built = qb.build_select().unwrap();
    assert_eq!(
        normalized(&built.dql),
        "SELECT u FROM App\\User u WHERE u.name = :p1 AND u.age > :p2 ORDER BY u.created DESC, u.id"
    );
    assert_eq!(
        values(&built),
        vec![Value::Text("alice".into()), Value::Int(18)]
    );
}

#[test]
fn from_may_follow_where() {
    let qb = DqlBuilder::new()
        .where_("status = :status", args!["active"])
        .from("Order", "o");

    let built = qb.build_select().unwrap();
    assert_eq!(built.dql, "SELECT o FROM Order o WHERE o.status = :status");
    assert_eq!(
        built.parameters.get("status").unwrap().value,
        Value::Text("active".into())
    );
}

#[test]
fn joins_render_with_their_condition_type() {
    let qb = DqlBuilder::new()
        .from("App\\Article", "a")
        .left_join("author", "au")
        .with("au.active = ?", args![true])
        .join("a.tags", "t")
        .on("t.name IN (:tags)", args![vec!["x", "y"]]);

    let built = qb.build_select().unwrap();
    assert_eq!(
        normalized(&built.dql),
        "SELECT a FROM App\\Article a LEFT JOIN a.author au WITH au.active = :p1 \
         JOIN a.tags t ON t.name IN (:tags)"
    );
    assert_eq!(
        built.parameters.get("tags").unwrap().param_type,
        Some(crate::value::ParamType::StringArray)
    );
}

#[test]
fn join_condition_without_join_is_reported_at_build() {
    let qb = DqlBuilder::new().from("User", "u").on("x = 1", args![]);
    let err = qb.build_select().unwrap_err();
    assert!(err.to_string().contains("without a join"));
}

#[test]
fn missing_from_is_invalid_state() {
    let qb = DqlBuilder::new().where_("a = 1", args![]);
    assert!(qb.build_select().unwrap_err().is_invalid_state());
    assert!(qb.get_dql().is_err());
}

#[test]
fn mode_switch_folds_where_conditions() {
    let qb = DqlBuilder::new()
        .from("User", "u")
        .where_("a = 1", args![])
        .where_("b = 2", args![])
        .or_where("c = 3", args![]);

    assert_eq!(
        qb.get_dql().unwrap(),
        "SELECT u FROM User u WHERE (u.a = 1 AND u.b = 2) OR u.c = 3"
    );
}

#[test]
fn group_having_and_result_aliases() {
    let qb = DqlBuilder::new()
        .select("u.team, COUNT(u.id) AS total")
        .from("User", "u")
        .group("team")
        .having("total > ?", args![5]);

    assert_eq!(
        normalized(qb.get_dql().unwrap()),
        "SELECT u.team, COUNT(u.id) AS total FROM User u GROUP BY u.team HAVING total > :p1"
    );
}

#[test]
fn update_statement() {
    let qb = DqlBuilder::new()
        .from("User", "u")
        .set("name", "bob")
        .set("visits", 3)
        .where_("id", args![7]);

    let built = qb.build_update().unwrap();
    assert_eq!(
        normalized(&built.dql),
        "UPDATE User u SET u.name = :set_name, u.visits = :set_visits WHERE u.id = :p3"
    );
    assert_eq!(
        values(&built),
        vec![Value::Text("bob".into()), Value::Int(3), Value::Int(7)]
    );
}

#[test]
fn update_without_assignments_is_invalid_state() {
    let qb = DqlBuilder::new().from("User", "u");
    assert!(qb.build_update().unwrap_err().is_invalid_state());
}

#[test]
fn delete_statement_with_null_shortcut() {
    let qb = DqlBuilder::new()
        .from("User", "u")
        .where_("deleted_at", args![None::<i32>]);

    let built = qb.build_delete().unwrap();
    assert_eq!(built.dql, "DELETE FROM User u WHERE u.deleted_at IS NULL");
    assert!(built.parameters.is_empty());
}

#[test]
fn nested_query_operand() {
    let sub = DqlBuilder::new()
        .select("t.id")
        .from("Team", "t")
        .where_("t.active = 1", args![]);
    let qb = DqlBuilder::new()
        .from("User", "u")
        .where_("team", args![&sub]);

    assert_eq!(
        qb.get_dql().unwrap(),
        "SELECT u FROM User u WHERE u.team IN (SELECT t.id FROM Team t WHERE t.active = 1)"
    );
}

#[test]
fn dql_is_memoized_until_mutation() {
    let qb = DqlBuilder::new().from("User", "u");
    let first = qb.get_dql().unwrap().as_ptr();
    let second = qb.get_dql().unwrap().as_ptr();
    assert_eq!(first, second);

    let qb = qb.where_("active = 1", args![]);
    assert_eq!(qb.get_dql().unwrap(), "SELECT u FROM User u WHERE u.active = 1");
}

#[test]
fn clones_do_not_share_conditions() {
    let base = DqlBuilder::new()
        .from("User", "u")
        .where_("active = 1", args![]);
    let derived = base.clone().where_("age > ?", args![18]);

    assert_eq!(base.get_dql().unwrap(), "SELECT u FROM User u WHERE u.active = 1");
    assert_eq!(
        normalized(derived.get_dql().unwrap()),
        "SELECT u FROM User u WHERE u.active = 1 AND u.age > :p1"
    );
    assert!(base.parameters().is_empty());
}

#[test]
fn bad_condition_arguments_surface_at_build() {
    let qb = DqlBuilder::new().from("User", "u").where_("a = ?", args![]);
    assert!(matches!(
        qb.build_select(),
        Err(DbError::InvalidArgument(_))
    ));
}

#[test]
fn limit_and_direction() {
    let built = DqlBuilder::new()
        .from("User", "u")
        .order_by("name", Direction::Desc)
        .limit(10, 20)
        .build_select()
        .unwrap();

    assert_eq!(built.dql, "SELECT u FROM User u ORDER BY u.name DESC");
    assert_eq!(built.max_results, Some(10));
    assert_eq!(built.first_result, Some(20));
}

#[test]
fn where_all_conjoins_pairs() {
    let qb = DqlBuilder::new()
        .from("User", "u")
        .where_all([("status", "new"), ("kind", "a")]);

    assert_eq!(
        normalized(qb.get_dql().unwrap()),
        "SELECT u FROM User u WHERE u.status = :p1 AND u.kind = :p2"
    );
}

#[test]
fn explicit_parameter_wins_over_condition_value() {
    let built = DqlBuilder::new()
        .from("users", "u")
        .where_("u.a = :x", args![1])
        .set_parameter("x", 2)
        .build_select()
        .unwrap();
    assert_eq!(built.parameters.get("x").unwrap().value, Value::Int(2));

    let qb = DqlBuilder::new()
        .from("users", "u")
        .set_parameter("x", 2)
        .where_("u.a = :x", args![1]);
    assert_eq!(qb.parameters().get("x").unwrap().value, Value::Int(2));
    assert_eq!(
        qb.build_select().unwrap().parameters.get("x").unwrap().value,
        Value::Int(2)
    );
}

#[test]
fn where_group_with_one_disjunction_is_parenthesized() {
    let mut group = ConditionBuilder::new();
    group.add_or("status = 'a' OR status = 'b'", args![]).unwrap();

    let built = DqlBuilder::new()
        .from("orders", "o")
        .where_("total > 10", args![])
        .where_group(Mode::And, group)
        .build_select()
        .unwrap();
    assert_eq!(
        built.dql,
        "SELECT o FROM orders o WHERE o.total > 10 AND (o.status = 'a' OR o.status = 'b')"
    );
}
