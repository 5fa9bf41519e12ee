//! Composite key derivation, decomposition and piecewise filtering.

#[cfg(test)]
mod tests {
    use dynamap_core::{Engine, Entity, MapperError, Predicate, StorageBackend, Value};
    use dynamap_model::{AttributeValue, Item};

    use crate::{engine, post_model, text};

    fn save_post(engine: &Engine, kind: &str, id: &str, ts: i64, upvotes: i64) -> Entity {
        let mut post = engine
            .create("Post")
            .and_then(|p| p.with("type", kind))
            .and_then(|p| p.with("id", id))
            .and_then(|p| p.with("ts", ts))
            .and_then(|p| p.with("upvotes", upvotes))
            .unwrap();
        engine.save(&mut post).unwrap();
        post
    }

    #[test]
    fn test_should_find_same_row_by_composite_or_sources() {
        let (engine, _) = engine();
        let saved = save_post(&engine, "tweet", "1234", 100, 0);
        save_post(&engine, "tweet", "999", 100, 0);
        save_post(&engine, "reply", "1234", 100, 0);

        let by_composite = engine
            .query("Post")
            .unwrap()
            .filter(Predicate::eq("uid", "tweet:1234"))
            .one()
            .unwrap();
        let piecewise_query = engine
            .query("Post")
            .unwrap()
            .filter(Predicate::eq("type", "tweet"))
            .filter(Predicate::eq("id", "1234"));
        let piecewise = piecewise_query.one().unwrap();

        assert_eq!(by_composite, piecewise);
        assert_eq!(by_composite, saved);
        assert!(piecewise_query.explain().unwrap().filter().is_empty());
    }

    #[test]
    fn test_should_round_trip_concat_composite() {
        let schema = post_model();
        let post = Entity::new(schema.clone())
            .with("type", "tweet")
            .unwrap()
            .with("id", "a:b")
            .unwrap();
        let uid = post.get("uid").unwrap();
        assert_eq!(uid, Value::from("tweet:a:b"));

        let composite = schema.composite("uid").unwrap();
        let parts = schema.decompose(composite, &uid).unwrap();
        assert_eq!(
            parts,
            vec![
                ("type".to_owned(), Value::from("tweet")),
                ("id".to_owned(), Value::from("a:b")),
            ]
        );
    }

    #[test]
    fn test_should_write_through_concat_but_not_custom_merge() {
        let (engine, _) = engine();
        let mut post = engine.create("Post").unwrap();
        post.set("uid", "note:77").unwrap();
        assert_eq!(text(&post, "type").as_deref(), Some("note"));
        assert_eq!(text(&post, "id").as_deref(), Some("77"));

        let err = post.set("score", 5).unwrap_err();
        assert!(matches!(err, MapperError::ReadOnlyComposite { ref field } if field == "score"));
        assert!(engine.model("Post").unwrap().composite("score").is_some());
    }

    #[test]
    fn test_should_derive_custom_range_key_from_sources() {
        let (engine, backend) = engine();
        save_post(&engine, "tweet", "1", 100, 2);
        save_post(&engine, "tweet", "1", 200, 1);
        backend.clear_calls();

        let query = engine
            .query("Post")
            .unwrap()
            .filter(Predicate::eq("uid", "tweet:1"))
            .filter(Predicate::eq("ts", 100))
            .filter(Predicate::eq("upvotes", 2));
        let plan = query.explain().unwrap();
        assert!(plan.index_name().is_none());
        let key = plan.key_condition().unwrap();
        assert!(key.range.is_some());
        // the merge cannot be inverted, so its sources are still checked
        assert_eq!(plan.filter().len(), 2);

        let found = query.one().unwrap();
        assert_eq!(found.get("score"), Some(Value::from(2100)));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_should_reject_save_with_incomplete_key_composite() {
        let (engine, backend) = engine();
        backend.clear_calls();
        let mut post = engine.create("Post").unwrap().with("type", "tweet").unwrap();
        let err = engine.save(&mut post).unwrap_err();
        assert!(
            matches!(err, MapperError::IncompleteComposite { ref field, ref missing } if field == "uid" && missing == &["id"])
        );
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_should_keep_sparse_index_sparse() {
        let (engine, backend) = engine();
        save_post(&engine, "tweet", "1", 100, 0);
        let mut owned = save_post(&engine, "tweet", "2", 150, 0);
        owned.set("username", "sam").unwrap();
        engine.sync(&mut owned).unwrap();

        let raw = backend
            .get("Post", &save_post(&engine, "tweet", "3", 1, 0).key().unwrap())
            .unwrap()
            .unwrap();
        assert!(!raw.contains_key("username"));

        let found = engine
            .query("Post")
            .unwrap()
            .filter(Predicate::eq("username", "sam"))
            .filter(Predicate::gt("ts", 100))
            .all()
            .unwrap();
        assert_eq!(found, vec![owned]);
    }

    #[test]
    fn test_should_fill_sources_from_stored_composite() {
        let (engine, backend) = engine();
        let item = Item::from([
            ("uid".to_owned(), AttributeValue::string("note:5")),
            ("score".to_owned(), AttributeValue::number(0)),
        ]);
        backend.put("Post", item, &[]).unwrap();

        let post = engine
            .get(
                "Post",
                &[
                    ("type", "note".into()),
                    ("id", "5".into()),
                    ("ts", 0.into()),
                    ("upvotes", 0.into()),
                ],
            )
            .unwrap()
            .unwrap();
        assert_eq!(text(&post, "type").as_deref(), Some("note"));
        assert_eq!(text(&post, "id").as_deref(), Some("5"));
        assert!(post.get("ts").is_none());
    }

    #[test]
    fn test_should_filter_sources_that_contain_the_separator() {
        let (engine, _) = engine();
        for (id, a, b) in [("1", "x:y", "z"), ("2", "x", "y:z")] {
            let mut pair = engine
                .create("Pair")
                .and_then(|p| p.with("id", id))
                .and_then(|p| p.with("a", a))
                .and_then(|p| p.with("b", b))
                .unwrap();
            engine.save(&mut pair).unwrap();
        }

        let query = engine
            .query("Pair")
            .unwrap()
            .filter(Predicate::eq("a", "x:y"))
            .filter(Predicate::eq("b", "z"));
        assert_eq!(
            query.explain().unwrap().to_string(),
            r#"query ab-index key [ab = "x:y:z"] filter [a = "x:y" AND b = "z"]"#
        );
        let found = query.all().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(text(&found[0], "id").as_deref(), Some("1"));

        let both = engine
            .query("Pair")
            .unwrap()
            .filter(Predicate::eq("ab", "x:y:z"))
            .count()
            .unwrap();
        assert_eq!(both, 2);
    }

    #[test]
    fn test_should_refuse_to_move_a_persisted_key() {
        let (engine, _) = engine();
        let mut post = save_post(&engine, "tweet", "1", 100, 0);
        post.set("upvotes", 3).unwrap();
        assert!(matches!(
            engine.sync(&mut post),
            Err(MapperError::KeyChanged { .. })
        ));
    }
}
