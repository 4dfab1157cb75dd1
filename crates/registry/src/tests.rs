//! Tests for the registry crate.

#[cfg(test)]
mod lifecycle_tests {
    use crate::descriptor::{FileDescriptor, OwnerRef};
    use crate::store::RegistryStore;
    use crate::token::{RandomTokenIssuer, TokenIssuer};
    use tempfile::TempDir;

    #[test]
    fn test_token_lifecycle() {
        let dir = TempDir::new().expect("temp dir");
        let store = RegistryStore::open(dir.path().join("database.json"));
        let issuer = RandomTokenIssuer;

        // nonexistent
        let token = issuer.new_token();
        assert_eq!(store.get(&token), None);

        // registered
        let descriptor = FileDescriptor::new(
            "R1",
            "movie.mp4",
            Some("video/mp4".to_string()),
            1_000_000,
            OwnerRef(99),
        );
        store.put(token.clone(), descriptor.clone()).unwrap();

        // served any number of times
        for _ in 0..3 {
            assert_eq!(store.get(&token), Some(descriptor.clone()));
        }

        // deleted, and the token never comes back
        assert!(store.delete(&token).unwrap());
        assert_eq!(store.get(&token), None);
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_list_is_ordered_by_token() {
        let dir = TempDir::new().expect("temp dir");
        let store = RegistryStore::open(dir.path().join("database.json"));

        for name in ["c", "a", "b"] {
            let desc = FileDescriptor::new(format!("ref-{name}"), name, None, 1, OwnerRef(1));
            store.put(crate::Token::new(name), desc).unwrap();
        }

        let tokens: Vec<String> = store
            .list()
            .into_iter()
            .map(|(token, _)| token.into_inner())
            .collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }
}
