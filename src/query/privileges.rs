//! Clause-to-privilege extraction offered to the auth collaborator.

use crate::query::ast::{Clause, QueryAst};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Privilege {
    Match,
    Create,
    Merge,
    Delete,
    Set,
    Remove,
    Index,
    Auth,
    Stream,
}

/// Privileges a query needs, deduplicated, in first-encounter order.
pub fn required_privileges(query: &QueryAst) -> Vec<Privilege> {
    let mut required = Vec::new();
    let push = |p: Privilege, out: &mut Vec<Privilege>| {
        if !out.contains(&p) {
            out.push(p);
        }
    };
    for clause in &query.clauses {
        match clause {
            Clause::Match { .. } => push(Privilege::Match, &mut required),
            Clause::Create { .. } => push(Privilege::Create, &mut required),
            Clause::Merge { .. } => push(Privilege::Merge, &mut required),
            Clause::Delete { .. } => push(Privilege::Delete, &mut required),
            Clause::Set { .. } => push(Privilege::Set, &mut required),
            Clause::Remove { .. } => push(Privilege::Remove, &mut required),
            Clause::CreateIndex { .. } => push(Privilege::Index, &mut required),
            Clause::Auth { .. } => push(Privilege::Auth, &mut required),
            Clause::Stream { .. } => push(Privilege::Stream, &mut required),
            Clause::Unwind { .. } | Clause::With { .. } | Clause::Return { .. } => {}
        }
    }
    required
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::Parser;
    use crate::query::stripped::StrippedQuery;

    fn privileges_of(query: &str) -> Vec<Privilege> {
        let stripped = StrippedQuery::new(query).unwrap();
        let storage = Parser::parse(&stripped).unwrap();
        required_privileges(&storage.query)
    }

    #[test]
    fn create_node() {
        assert_eq!(privileges_of("CREATE (n)"), vec![Privilege::Create]);
    }

    #[test]
    fn match_node_delete() {
        assert_eq!(
            privileges_of("MATCH (n) DELETE n"),
            vec![Privilege::Match, Privilege::Delete]
        );
    }

    #[test]
    fn match_node_return() {
        assert_eq!(privileges_of("MATCH (n) RETURN n"), vec![Privilege::Match]);
    }

    #[test]
    fn match_create_expand() {
        assert_eq!(
            privileges_of("MATCH (n) CREATE (n)-[r:T]->(m)"),
            vec![Privilege::Match, Privilege::Create]
        );
    }

    #[test]
    fn match_set_labels_and_property() {
        assert_eq!(
            privileges_of("MATCH (n) SET n:A:B"),
            vec![Privilege::Match, Privilege::Set]
        );
        assert_eq!(
            privileges_of("MATCH (n) SET n.p = 42"),
            vec![Privilege::Match, Privilege::Set]
        );
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(
            privileges_of("MATCH (n) MATCH (m) RETURN n, m"),
            vec![Privilege::Match]
        );
    }

    #[test]
    fn index_auth_stream() {
        assert_eq!(privileges_of("CREATE INDEX ON :L(p)"), vec![Privilege::Index]);
        assert_eq!(privileges_of("CREATE USER u"), vec![Privilege::Auth]);
        assert_eq!(privileges_of("SHOW STREAMS"), vec![Privilege::Stream]);
    }
}
