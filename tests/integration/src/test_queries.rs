//! Index selection and query execution scenarios.

#[cfg(test)]
mod tests {
    use dynamap_core::backend::BackendCall;
    use dynamap_core::{MapperConfig, MapperError, PlanMode, Predicate};

    use crate::{engine, engine_with, save_user, text};

    fn names(entities: &[dynamap_core::Entity]) -> Vec<String> {
        entities.iter().filter_map(|e| text(e, "name")).collect()
    }

    #[test]
    fn test_should_answer_range_filter_through_local_index() {
        let (engine, backend) = engine();
        save_user(&engine, "a", "Adam", 50);
        save_user(&engine, "a", "Aaron", 100);
        backend.clear_calls();

        let query = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .filter(Predicate::gt("score", 75));
        let found = query.all().unwrap();
        assert_eq!(names(&found), vec!["Aaron"]);
        assert_eq!(found[0].get("score"), Some(100.into()));
        assert_eq!(
            backend.calls(),
            vec![BackendCall::Query {
                table: "User".to_owned(),
                index: Some("score-index".to_owned()),
                consistent: false,
            }]
        );
        assert_eq!(
            query.explain().unwrap().to_string(),
            r#"query score-index key [id = "a" AND score > 75]"#
        );
    }

    #[test]
    fn test_should_require_hash_key_for_query_but_not_scan() {
        let (engine, backend) = engine();
        save_user(&engine, "a", "Adam", 50);
        save_user(&engine, "b", "Bob", 80);
        backend.clear_calls();

        let err = engine
            .query("User")
            .unwrap()
            .filter(Predicate::gt("score", 10))
            .all()
            .unwrap_err();
        assert!(matches!(err, MapperError::MissingHashKey { ref field, .. } if field == "id"));
        assert!(err.is_planning_error());
        assert!(backend.calls().is_empty());

        let scan = engine
            .scan("User")
            .unwrap()
            .filter(Predicate::gt("score", 10));
        assert_eq!(scan.explain().unwrap().mode(), PlanMode::Scan);
        assert_eq!(scan.count().unwrap(), 2);
        assert_eq!(engine.scan("User").unwrap().all().unwrap().len(), 2);
    }

    #[test]
    fn test_should_report_no_matching_index() {
        let (engine, _) = engine();
        let err = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("name", "Adam"))
            .explain()
            .unwrap_err();
        assert!(matches!(err, MapperError::NoMatchingIndex { ref fields, .. } if fields == &["name"]));
    }

    #[test]
    fn test_should_surface_ambiguity_and_resolve_with_override() {
        let (engine, backend) = engine();
        for (id, created) in [("1", 10), ("2", 20)] {
            let mut account = engine
                .create("Account")
                .unwrap()
                .with("id", id)
                .unwrap()
                .with("email", "x@example.com")
                .unwrap()
                .with("created", created)
                .unwrap();
            engine.save(&mut account).unwrap();
        }
        backend.clear_calls();

        let query = engine
            .query("Account")
            .unwrap()
            .filter(Predicate::eq("email", "x@example.com"));
        let err = query.all().unwrap_err();
        let MapperError::AmbiguousIndex { candidates, .. } = err else {
            panic!("expected an ambiguous index error, got {err}");
        };
        assert_eq!(candidates, vec!["email-index", "email-created-index"]);
        assert!(backend.calls().is_empty());

        let resolved = query.clone().index("email-index");
        let first = resolved.explain().unwrap();
        assert_eq!(first, resolved.explain().unwrap());
        assert_eq!(first.index_name(), Some("email-index"));
        assert_eq!(resolved.count().unwrap(), 2);

        let ranged = query.filter(Predicate::gt("created", 15));
        assert_eq!(
            ranged.explain().unwrap().index_name(),
            Some("email-created-index")
        );
        assert_eq!(ranged.count().unwrap(), 1);
    }

    #[test]
    fn test_should_reject_unsupported_operator_before_io() {
        let (engine, backend) = engine();
        save_user(&engine, "a", "Adam", 10);
        backend.clear_calls();

        let err = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("name", "Adam"))
            .filter(Predicate::ne("score", 10))
            .all()
            .unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedOperator { .. }));
        assert!(backend.calls().is_empty());

        for predicate in [
            Predicate::is_in("score", [1, 2]),
            Predicate::contains("tags", "x"),
            Predicate::is_null("email"),
        ] {
            let err = engine
                .scan("User")
                .unwrap()
                .filter(predicate)
                .count()
                .unwrap_err();
            assert!(matches!(err, MapperError::UnsupportedOperator { .. }));
        }
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_should_reject_second_range_condition() {
        let (engine, _) = engine();
        let err = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .filter(Predicate::gt("score", 1))
            .filter(Predicate::lt("score", 9))
            .explain()
            .unwrap_err();
        assert!(matches!(err, MapperError::MultipleRangeCondition { ref field, .. } if field == "score"));

        let between = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .filter(Predicate::between("score", 1, 9))
            .explain()
            .unwrap();
        assert_eq!(between.index_name(), Some("score-index"));
    }

    #[test]
    fn test_should_filter_residual_predicates_in_backend() {
        let (engine, _) = engine();
        for (name, score, email) in [("Adam", 50, "a@x"), ("Aaron", 100, "a@x"), ("Abe", 70, "b@x")] {
            let mut user = save_user(&engine, "a", name, score);
            user.set("email", email).unwrap();
            engine.sync(&mut user).unwrap();
        }

        let query = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .filter(Predicate::gte("score", 70))
            .filter(Predicate::eq("email", "a@x"));
        let plan = query.explain().unwrap();
        assert_eq!(plan.index_name(), Some("score-index"));
        assert_eq!(
            plan.to_string(),
            r#"query score-index key [id = "a" AND score >= 70] filter [email = "a@x"]"#
        );
        assert_eq!(names(&query.all().unwrap()), vec!["Aaron"]);
    }

    #[test]
    fn test_should_query_global_index() {
        let (engine, _) = engine();
        let mut user = save_user(&engine, "a", "Adam", 50);
        user.set("email", "adam@example.com").unwrap();
        engine.sync(&mut user).unwrap();
        save_user(&engine, "b", "Bob", 10);

        let found = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("email", "adam@example.com"))
            .one()
            .unwrap();
        assert_eq!(found, user);
    }

    #[test]
    fn test_should_page_order_and_limit() {
        let (engine, backend) = engine_with(MapperConfig::builder().page_size(2).build());
        for (name, score) in [("Ann", 5), ("Bea", 3), ("Cal", 4), ("Dot", 1), ("Eve", 2)] {
            save_user(&engine, "p", name, score);
        }
        backend.clear_calls();

        let query = engine.query("User").unwrap().filter(Predicate::eq("id", "p"));
        assert_eq!(
            names(&query.all().unwrap()),
            vec!["Ann", "Bea", "Cal", "Dot", "Eve"]
        );
        assert_eq!(backend.calls().len(), 3);

        let by_score = query
            .clone()
            .filter(Predicate::gt("score", 0))
            .descending()
            .limit(3);
        assert_eq!(names(&by_score.all().unwrap()), vec!["Ann", "Cal", "Bea"]);

        let lazy: Vec<String> = query
            .iter()
            .unwrap()
            .take(1)
            .map(|e| text(&e.unwrap(), "name").unwrap())
            .collect();
        assert_eq!(lazy, vec!["Ann"]);
    }

    #[test]
    fn test_should_distinguish_first_and_one() {
        let (engine, _) = engine();
        save_user(&engine, "a", "Adam", 50);
        save_user(&engine, "a", "Aaron", 100);

        let all_a = engine.query("User").unwrap().filter(Predicate::eq("id", "a"));
        assert_eq!(
            text(&all_a.first().unwrap().unwrap(), "name").as_deref(),
            Some("Aaron")
        );
        assert!(matches!(
            all_a.one(),
            Err(MapperError::MultipleResults { .. })
        ));

        let none = engine.query("User").unwrap().filter(Predicate::eq("id", "z"));
        assert!(none.first().unwrap().is_none());
        assert!(matches!(none.one(), Err(MapperError::NoResult { .. })));

        let adam = all_a.filter(Predicate::eq("name", "Adam")).one().unwrap();
        assert_eq!(adam.get("score"), Some(50.into()));
    }

    #[test]
    fn test_should_delete_matches_and_count() {
        let (engine, backend) = engine();
        save_user(&engine, "a", "Adam", 50);
        save_user(&engine, "a", "Aaron", 100);
        save_user(&engine, "b", "Bob", 10);

        let low = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .filter(Predicate::lt("score", 75));
        assert_eq!(low.count().unwrap(), 1);
        assert_eq!(low.delete().unwrap(), 1);
        assert_eq!(low.count().unwrap(), 0);
        assert_eq!(backend.item_count("User").unwrap(), 2);
    }

    #[test]
    fn test_should_reject_index_on_scan() {
        let (engine, _) = engine();
        let err = engine
            .scan("User")
            .unwrap()
            .index("score-index")
            .all()
            .unwrap_err();
        assert!(matches!(err, MapperError::ScanWithIndex { .. }));

        let err = engine
            .query("User")
            .unwrap()
            .filter(Predicate::eq("id", "a"))
            .index("nope")
            .explain()
            .unwrap_err();
        assert!(matches!(err, MapperError::UnknownIndex { .. }));
    }
}
