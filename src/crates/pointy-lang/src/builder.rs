//! Graph Builder: lowers a parsed `Expr` into the Task Graph IR, validating
//! task names against the registry and wiring edges per operator semantics.

use crate::ast::Expr;
use crate::error::{PointyError, Result};
use crate::graph::{EdgeKind, GraphBuilder, NodeId, TaskGraph};
use crate::registry::TaskRegistry;

/// The entry and exit frontier of a subgraph under construction. Every
/// `build_expr` call returns one so the caller can wire it into whatever
/// combinator is above it in the tree.
struct Subgraph {
    entries: Vec<NodeId>,
    exits: Vec<NodeId>,
}

/// Lower `expr` into a complete, validated `TaskGraph`.
pub fn build(expr: &Expr, registry: &dyn TaskRegistry) -> Result<TaskGraph> {
    let mut gb = GraphBuilder::new();
    build_expr(&mut gb, expr, registry, "")?;
    Ok(gb.finish())
}

fn build_expr(gb: &mut GraphBuilder, expr: &Expr, registry: &dyn TaskRegistry, suffix: &str) -> Result<Subgraph> {
    match expr {
        Expr::TaskRef(name) => {
            if registry.lookup(name).is_none() {
                return Err(PointyError::unknown_task(name.clone()));
            }
            let path = if suffix.is_empty() {
                name.clone()
            } else {
                format!("{name}{suffix}")
            };
            let id = gb.add_node(name.clone(), path);
            Ok(Subgraph {
                entries: vec![id],
                exits: vec![id],
            })
        }

        Expr::Seq(l, r) => {
            let l = build_expr(gb, l, registry, suffix)?;
            let r = build_expr(gb, r, registry, suffix)?;
            wire(gb, &l.exits, &r.entries, EdgeKind::Seq);
            Ok(Subgraph {
                entries: l.entries,
                exits: r.exits,
            })
        }

        Expr::Broadcast(l, r) => {
            let l = build_expr(gb, l, registry, suffix)?;
            let r = build_expr(gb, r, registry, suffix)?;
            wire(gb, &l.exits, &r.entries, EdgeKind::Broadcast);
            Ok(Subgraph {
                entries: l.entries,
                exits: r.exits,
            })
        }

        Expr::Parallel(l, r) => {
            // Parallel edges do not exist in the IR; siblings are simply
            // unioned with no edges between them.
            let l = build_expr(gb, l, registry, suffix)?;
            let r = build_expr(gb, r, registry, suffix)?;
            let mut entries = l.entries;
            entries.extend(r.entries);
            let mut exits = l.exits;
            exits.extend(r.exits);
            Ok(Subgraph { entries, exits })
        }

        Expr::Retry(task, n) | Expr::RetryInverse(n, task) => {
            let sub = build_expr(gb, task, registry, suffix)?;
            for &id in &sub.entries {
                gb.node_mut(id).retry_budget = *n;
            }
            Ok(sub)
        }

        Expr::Descriptor(n, child) => {
            if *n == 0 {
                return Err(PointyError::shape("descriptor replica count must be at least 1"));
            }
            let mut entries = Vec::new();
            let mut exits = Vec::new();
            for i in 0..*n {
                let replica_suffix = format!("{suffix}#{i}");
                let sub = build_expr(gb, child, registry, &replica_suffix)?;
                for &id in &sub.entries {
                    gb.node_mut(id).replica_count = *n;
                }
                entries.extend(sub.entries);
                exits.extend(sub.exits);
            }
            Ok(Subgraph { entries, exits })
        }

        Expr::Call(callee, args) => {
            if args.len() < 2 {
                return Err(PointyError::shape("conditional call requires at least two branches"));
            }
            let callee_sub = build_expr(gb, callee, registry, suffix)?;
            let callee_path = gb.node(*callee_sub.entries.first().expect("Call operand always has an entry")).path.clone();

            let mut exits = Vec::new();
            let mut groups: Vec<Vec<NodeId>> = Vec::new();
            for arg in args {
                let arg_sub = build_expr(gb, arg, registry, suffix)?;
                for &from in &callee_sub.exits {
                    for &to in &arg_sub.entries {
                        gb.add_edge(from, to, EdgeKind::Conditional);
                    }
                }
                for &entry in &arg_sub.entries {
                    let original = gb.node(entry).path.clone();
                    gb.node_mut(entry).path = format!("{callee_path}/{original}");
                }
                groups.push(arg_sub.entries.clone());
                exits.extend(arg_sub.exits);
            }
            for &from in &callee_sub.exits {
                let node = gb.node_mut(from);
                node.conditional_children = groups.iter().flatten().copied().collect();
                node.conditional_groups = groups.clone();
            }

            Ok(Subgraph {
                entries: callee_sub.entries,
                exits,
            })
        }
    }
}

fn wire(gb: &mut GraphBuilder, froms: &[NodeId], tos: &[NodeId], kind: EdgeKind) {
    for &from in froms {
        for &to in tos {
            gb.add_edge(from, to, kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::registry::{HandlerKind, InvokeContext, InvokeFuture, StaticRegistry, TaskHandler};
    use serde_json::Value;
    use std::sync::Arc;

    struct Noop;
    impl TaskHandler for Noop {
        fn invoke(&self, _inputs: Vec<Value>, _ctx: InvokeContext) -> InvokeFuture<'_> {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    fn registry(names: &[&str]) -> StaticRegistry {
        let mut r = StaticRegistry::new();
        for name in names {
            r.insert(*name, Arc::new(Noop) as Arc<dyn TaskHandler>);
        }
        r
    }

    #[test]
    fn single_task_builds_a_one_node_graph() {
        let expr = parse_source("a").unwrap();
        let graph = build(&expr, &registry(&["a"])).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.entry.len(), 1);
        assert_eq!(graph.exit, graph.entry);
    }

    #[test]
    fn unknown_task_name_is_rejected() {
        let expr = parse_source("a -> b").unwrap();
        let err = build(&expr, &registry(&["a"])).unwrap_err();
        assert!(matches!(err, PointyError::UnknownTaskError { name } if name == "b"));
    }

    #[test]
    fn seq_wires_every_exit_of_left_to_every_entry_of_right() {
        let expr = parse_source("a -> b").unwrap();
        let graph = build(&expr, &registry(&["a", "b"])).unwrap();
        assert_eq!(graph.len(), 2);
        let a = graph.nodes().find(|n| n.task_name == "a").unwrap();
        let b = graph.nodes().find(|n| n.task_name == "b").unwrap();
        assert_eq!(a.successors, vec![b.id]);
        assert_eq!(graph.edge_kind(a.id, b.id), Some(EdgeKind::Seq));
    }

    #[test]
    fn descriptor_materializes_independent_replicas() {
        let expr = parse_source("3 -> downloader -> parser").unwrap();
        let graph = build(&expr, &registry(&["downloader", "parser"])).unwrap();
        let downloaders: Vec<_> = graph.nodes().filter(|n| n.task_name == "downloader").collect();
        assert_eq!(downloaders.len(), 3);
        assert!(downloaders.iter().all(|n| n.replica_count == 3));
        let parser = graph.nodes().find(|n| n.task_name == "parser").unwrap();
        assert_eq!(parser.predecessors.len(), 3);
    }

    #[test]
    fn retry_budget_lands_on_the_task_node() {
        let expr = parse_source("a * 3").unwrap();
        let graph = build(&expr, &registry(&["a"])).unwrap();
        assert_eq!(graph.nodes().next().unwrap().retry_budget, 3);
    }

    #[test]
    fn conditional_call_marks_children_and_distinct_paths() {
        let expr = parse_source("router(success, failure)").unwrap();
        let graph = build(&expr, &registry(&["router", "success", "failure"])).unwrap();
        let router = graph.nodes().find(|n| n.task_name == "router").unwrap();
        assert_eq!(router.conditional_children.len(), 2);
        assert_eq!(router.conditional_groups.len(), 2);
        assert!(router.conditional_groups.iter().all(|g| g.len() == 1));
        let success = graph.nodes().find(|n| n.task_name == "success").unwrap();
        assert_eq!(success.path, "router/success");
    }

    #[test]
    fn conditional_branch_with_multiple_entries_stays_one_group() {
        let expr = parse_source("router(a || b, c)").unwrap();
        let graph = build(&expr, &registry(&["router", "a", "b", "c"])).unwrap();
        let router = graph.nodes().find(|n| n.task_name == "router").unwrap();
        assert_eq!(router.conditional_groups.len(), 2, "two task_group members: `a || b` and `c`");
        let parallel_group = router.conditional_groups.iter().find(|g| g.len() == 2).expect("`a || b` is one two-entry group");
        let names: Vec<_> = parallel_group.iter().map(|&id| graph.node(id).task_name.clone()).collect();
        assert!(names.contains(&"a".to_string()) && names.contains(&"b".to_string()));
    }

    #[test]
    fn worked_example_builds_without_error() {
        let expr = parse_source("3 |-> downloader -> 5 * parser || notifier -> router(success, failure)").unwrap();
        let graph = build(&expr, &registry(&["downloader", "parser", "notifier", "router", "success", "failure"])).unwrap();
        assert_eq!(graph.nodes().filter(|n| n.task_name == "downloader").count(), 3);
        let parser = graph.nodes().find(|n| n.task_name == "parser").unwrap();
        assert_eq!(parser.retry_budget, 5);
    }
}
