use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::GraphStoreConfig;
use crate::models::{GraphEdge, GraphHit, GraphNode, GraphSnapshot, GraphStatistics, Relationship};
use crate::{Error, Result};

/// Node label written for every entity
const ENTITY_LABEL: &str = "Entity";

/// SQLite bind-parameter budget per frontier query
const FRONTIER_BATCH: usize = 400;

/// Knowledge-graph capability.
///
/// Implementations must make get-or-create atomic under concurrent callers:
/// ingestion workers upsert in parallel and no lock is taken in-process.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Get-or-create an entity by exact (case-sensitive) name
    async fn upsert_entity(&self, name: &str) -> Result<()>;

    /// Get-or-create both entities and the typed edge between them
    async fn upsert(&self, relationship: &Relationship) -> Result<()>;

    /// Walk up to `max_hops` edges in either direction from every entity whose
    /// name contains `name_fragment` (case-insensitive), returning at most
    /// `limit` distinct `(seed, first edge type, endpoint)` rows
    async fn traverse(
        &self,
        name_fragment: &str,
        max_hops: usize,
        limit: usize,
    ) -> Result<Vec<GraphHit>>;

    async fn snapshot(&self, limit: usize) -> Result<GraphSnapshot>;

    async fn stats(&self) -> Result<GraphStatistics>;
}

/// Bounded connection retry applied on first use
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl From<&GraphStoreConfig> for RetryPolicy {
    fn from(config: &GraphStoreConfig) -> Self {
        Self {
            attempts: config.connect_attempts,
            backoff: config.connect_backoff(),
        }
    }
}

/// SQLite-backed graph store.
///
/// Uniqueness constraints on entity names and on (source, type, target) plus
/// `ON CONFLICT DO NOTHING` give atomic get-or-create; SQLite serialises
/// writers across connections.
pub struct SqliteGraphStore {
    url: String,
    max_connections: u32,
    retry: RetryPolicy,
    pool: OnceCell<SqlitePool>,
}

impl SqliteGraphStore {
    /// Nothing is opened until the first operation
    pub fn new(config: &GraphStoreConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            retry: RetryPolicy::from(config),
            pool: OnceCell::new(),
        }
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_schema(&pool).await?;
        Ok(Self {
            url: String::new(),
            max_connections: 0,
            retry: RetryPolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            },
            pool: OnceCell::new_with(Some(pool)),
        })
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = connect_with_retry(&self.url, self.max_connections, &self.retry).await?;
                init_schema(&pool).await?;
                info!("Graph store ready");
                Ok::<_, Error>(pool)
            })
            .await
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

async fn connect_with_retry(
    url: &str,
    max_connections: u32,
    retry: &RetryPolicy,
) -> Result<SqlitePool> {
    let attempts = retry.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                warn!(attempt, attempts, "Graph store connection failed: {}", e);
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(retry.backoff).await;
                }
            }
        }
    }

    Err(Error::ServiceUnavailable(format!(
        "Graph store unreachable after {} attempts: {}",
        attempts, last_error
    )))
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            name_folded TEXT NOT NULL,
            type TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_name_folded ON entities(name_folded)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES entities(id),
            relation_type TEXT NOT NULL,
            target_id INTEGER NOT NULL REFERENCES entities(id),
            UNIQUE (source_id, relation_type, target_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// `name_folded` is written here because SQLite's `lower()` only folds ASCII
const UPSERT_ENTITY: &str = "INSERT INTO entities (name, name_folded, type) VALUES (?, ?, ?) \
     ON CONFLICT(name) DO NOTHING";

/// One edge of the loaded neighbourhood
struct EdgeRow {
    id: i64,
    source_id: i64,
    source_name: String,
    relation_type: String,
    target_id: i64,
    target_name: String,
}

#[async_trait::async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_entity(&self, name: &str) -> Result<()> {
        let pool = self.pool().await?;
        sqlx::query(UPSERT_ENTITY)
            .bind(name)
            .bind(name.to_lowercase())
            .bind(ENTITY_LABEL)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, relationship: &Relationship) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        for name in [&relationship.source, &relationship.target] {
            sqlx::query(UPSERT_ENTITY)
                .bind(name)
                .bind(name.to_lowercase())
                .bind(ENTITY_LABEL)
                .execute(&mut *tx)
                .await?;
        }

        // The WHERE clause keeps SQLite from reading ON CONFLICT as a join constraint
        sqlx::query(
            r#"
            INSERT INTO relationships (source_id, relation_type, target_id)
            SELECT s.id, ?, t.id FROM entities s, entities t
            WHERE s.name = ? AND t.name = ?
            ON CONFLICT(source_id, relation_type, target_id) DO NOTHING
        "#,
        )
        .bind(relationship.relation_type.as_str())
        .bind(&relationship.source)
        .bind(&relationship.target)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Upserted ({})-[{}]->({})",
            relationship.source, relationship.relation_type, relationship.target
        );
        Ok(())
    }

    async fn traverse(
        &self,
        name_fragment: &str,
        max_hops: usize,
        limit: usize,
    ) -> Result<Vec<GraphHit>> {
        let fragment = name_fragment.trim();
        if fragment.is_empty() || max_hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let pool = self.pool().await?;

        let seeds: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, name FROM entities WHERE instr(name_folded, ?) > 0 ORDER BY name",
        )
        .bind(fragment.to_lowercase())
        .fetch_all(pool)
        .await?;

        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let edges = load_neighbourhood(pool, seeds.iter().map(|(id, _)| *id), max_hops).await?;
        let neighbourhood = Neighbourhood::build(&edges);

        let mut walk = Walk {
            max_hops,
            limit,
            hits: Vec::new(),
            seen: HashSet::new(),
            used: Vec::new(),
        };
        for (seed_id, seed_name) in &seeds {
            if walk.is_full() {
                break;
            }
            if let Some(&start) = neighbourhood.nodes.get(seed_id) {
                walk.visit(&neighbourhood.graph, seed_name, start, 0, None);
            }
        }

        debug!(
            "Traversal for '{}' matched {} seeds, {} hits",
            fragment,
            seeds.len(),
            walk.hits.len()
        );
        Ok(walk.hits)
    }

    async fn snapshot(&self, limit: usize) -> Result<GraphSnapshot> {
        let pool = self.pool().await?;

        let nodes: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM entities ORDER BY id LIMIT ?")
                .bind(sql_limit(limit))
                .fetch_all(pool)
                .await?;

        let edges: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT s.name, r.relation_type, t.name
            FROM relationships r
            JOIN entities s ON s.id = r.source_id
            JOIN entities t ON t.id = r.target_id
            ORDER BY r.id
            LIMIT ?
        "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(pool)
        .await?;

        Ok(GraphSnapshot {
            nodes: nodes
                .into_iter()
                .map(|(name, node_type)| GraphNode {
                    id: name.clone(),
                    label: name,
                    node_type,
                })
                .collect(),
            edges: edges
                .into_iter()
                .map(|(source, label, target)| GraphEdge {
                    source,
                    label,
                    target,
                })
                .collect(),
        })
    }

    async fn stats(&self) -> Result<GraphStatistics> {
        let pool = self.pool().await?;

        let (entity_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities")
            .fetch_one(pool)
            .await?;
        let (relationship_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relationships")
            .fetch_one(pool)
            .await?;
        let sample: Vec<(String,)> = sqlx::query_as("SELECT name FROM entities ORDER BY id LIMIT 5")
            .fetch_all(pool)
            .await?;

        Ok(GraphStatistics {
            entity_count,
            relationship_count,
            sample_entities: sample.into_iter().map(|(name,)| name).collect(),
        })
    }
}

/// Fetch every edge within `max_hops` of the seeds, hop by hop
async fn load_neighbourhood(
    pool: &SqlitePool,
    seeds: impl Iterator<Item = i64>,
    max_hops: usize,
) -> Result<Vec<EdgeRow>> {
    let mut visited: HashSet<i64> = seeds.collect();
    let mut frontier: Vec<i64> = visited.iter().copied().collect();
    let mut edge_ids = HashSet::new();
    let mut edges = Vec::new();

    for _ in 0..max_hops {
        if frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();

        for batch in frontier.chunks(FRONTIER_BATCH) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"
                SELECT r.id, r.source_id, s.name, r.relation_type, r.target_id, t.name
                FROM relationships r
                JOIN entities s ON s.id = r.source_id
                JOIN entities t ON t.id = r.target_id
                WHERE r.source_id IN ("#,
            );
            push_ids(&mut query, batch);
            query.push(") OR r.target_id IN (");
            push_ids(&mut query, batch);
            query.push(") ORDER BY r.id");

            let rows: Vec<(i64, i64, String, String, i64, String)> =
                query.build_query_as().fetch_all(pool).await?;

            for (id, source_id, source_name, relation_type, target_id, target_name) in rows {
                if !edge_ids.insert(id) {
                    continue;
                }
                for endpoint in [source_id, target_id] {
                    if visited.insert(endpoint) {
                        next.push(endpoint);
                    }
                }
                edges.push(EdgeRow {
                    id,
                    source_id,
                    source_name,
                    relation_type,
                    target_id,
                    target_name,
                });
            }
        }

        frontier = next;
    }

    edges.sort_by_key(|e| e.id);
    Ok(edges)
}

/// Clamp to SQLite's signed range; a wrapped negative LIMIT would mean "no limit"
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn push_ids(query: &mut QueryBuilder<Sqlite>, ids: &[i64]) {
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
}

/// In-memory copy of the loaded neighbourhood
struct Neighbourhood {
    graph: DiGraph<String, String>,
    nodes: HashMap<i64, NodeIndex>,
}

impl Neighbourhood {
    fn build(edges: &[EdgeRow]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for edge in edges {
            let source = *nodes
                .entry(edge.source_id)
                .or_insert_with(|| graph.add_node(edge.source_name.clone()));
            let target = *nodes
                .entry(edge.target_id)
                .or_insert_with(|| graph.add_node(edge.target_name.clone()));
            graph.add_edge(source, target, edge.relation_type.clone());
        }

        Self { graph, nodes }
    }
}

/// Depth-first path enumeration; an edge is never reused within one path
struct Walk {
    max_hops: usize,
    limit: usize,
    hits: Vec<GraphHit>,
    seen: HashSet<GraphHit>,
    used: Vec<EdgeIndex>,
}

impl Walk {
    fn is_full(&self) -> bool {
        self.hits.len() >= self.limit
    }

    fn visit(
        &mut self,
        graph: &DiGraph<String, String>,
        seed_name: &str,
        node: NodeIndex,
        depth: usize,
        first_type: Option<&str>,
    ) {
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in graph.edges_directed(node, direction) {
                if self.is_full() {
                    return;
                }
                if self.used.contains(&edge.id()) {
                    continue;
                }

                let next = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                let relation_type = first_type.unwrap_or(edge.weight().as_str());

                let hit = GraphHit {
                    source: seed_name.to_string(),
                    relation_type: relation_type.to_string(),
                    target: graph[next].clone(),
                };
                if self.seen.insert(hit.clone()) {
                    self.hits.push(hit);
                }

                if depth + 1 < self.max_hops {
                    self.used.push(edge.id());
                    self.visit(graph, seed_name, next, depth + 1, Some(relation_type));
                    self.used.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelationType, Triplet};
    use crate::testing::memory_pool;
    use std::sync::Arc;

    fn rel(source: &str, predicate: &str, target: &str) -> Relationship {
        Relationship::from_triplet(&Triplet::new(source, predicate, target)).unwrap()
    }

    async fn store() -> SqliteGraphStore {
        SqliteGraphStore::from_pool(memory_pool().await).await.unwrap()
    }

    #[tokio::test]
    async fn test_repeated_upsert_is_idempotent() {
        let store = store().await;
        let paris = rel("Paris", "capital of", "France");

        for _ in 0..5 {
            store.upsert(&paris).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
    }

    #[tokio::test]
    async fn test_distinct_types_between_same_pair_are_kept() {
        let store = store().await;
        store.upsert(&rel("Paris", "capital of", "France")).await.unwrap();
        store.upsert(&rel("Paris", "located in", "France")).await.unwrap();
        store.upsert(&rel("France", "contains", "Paris")).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 3);
    }

    #[tokio::test]
    async fn test_entity_names_are_case_sensitive_for_writes() {
        let store = store().await;
        store.upsert_entity("paris").await.unwrap();
        store.upsert_entity("Paris").await.unwrap();
        store.upsert_entity("Paris").await.unwrap();

        assert_eq!(store.stats().await.unwrap().entity_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_do_not_duplicate() {
        let store = Arc::new(store().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(&rel("Alice", "knows", "Bob")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_across_pooled_connections() {
        let path = std::env::temp_dir().join(format!("hybridrag-graph-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(SqliteGraphStore::new(&GraphStoreConfig {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 10,
            connect_attempts: 1,
            connect_backoff_ms: 0,
        }));

        let names = ["Ada", "Bob", "Cy", "Dee", "Eve", "Fay", "Gus"];
        let mut handles = Vec::new();
        for i in 0..200 {
            let store = store.clone();
            let source = names[i % names.len()];
            let target = names[(i + 1) % names.len()];
            handles.push(tokio::spawn(async move {
                store.upsert(&rel(source, "knows", target)).await?;
                store.traverse(source, 2, 15).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await.unwrap();
        store.close().await;
        let _ = std::fs::remove_file(&path);

        assert_eq!(stats.entity_count, 7);
        assert_eq!(stats.relationship_count, 7);
    }

    #[tokio::test]
    async fn test_traverse_matches_substring_case_insensitively() {
        let store = store().await;
        store.upsert(&rel("Paris", "capital of", "France")).await.unwrap();

        let hits = store.traverse("FRAN", 2, 15).await.unwrap();
        assert_eq!(
            hits,
            vec![GraphHit {
                source: "France".to_string(),
                relation_type: "CAPITAL_OF".to_string(),
                target: "Paris".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_traverse_folds_non_ascii_case() {
        let store = store().await;
        store.upsert(&rel("Österreich", "borders", "Deutschland")).await.unwrap();

        let exact = store.traverse("Österreich", 2, 15).await.unwrap();
        let folded = store.traverse("österreich", 2, 15).await.unwrap();
        let upper = store.traverse("ÖSTERR", 2, 15).await.unwrap();

        assert_eq!(exact.len(), 1);
        assert_eq!(folded, exact);
        assert_eq!(upper, exact);
        assert_eq!(folded[0].to_string(), "Österreich BORDERS Deutschland");
    }

    #[tokio::test]
    async fn test_traverse_reaches_two_hops_with_first_edge_type() {
        let store = store().await;
        store.upsert(&rel("A", "knows", "B")).await.unwrap();
        store.upsert(&rel("B", "works at", "C")).await.unwrap();
        store.upsert(&rel("C", "owns", "D")).await.unwrap();

        let hits = store.traverse("A", 2, 15).await.unwrap();
        let rendered: Vec<String> = hits.iter().map(|h| h.to_string()).collect();

        assert_eq!(rendered, vec!["A KNOWS B", "A KNOWS C"]);

        let one_hop = store.traverse("A", 1, 15).await.unwrap();
        assert_eq!(one_hop.len(), 1);
    }

    #[tokio::test]
    async fn test_traverse_respects_limit() {
        let store = store().await;
        for i in 0..30 {
            store
                .upsert(&rel("Hub", "links", &format!("Spoke{}", i)))
                .await
                .unwrap();
        }

        let hits = store.traverse("hub", 2, 15).await.unwrap();
        assert_eq!(hits.len(), 15);

        let unique: HashSet<_> = hits.iter().collect();
        assert_eq!(unique.len(), 15);
    }

    #[tokio::test]
    async fn test_traverse_unknown_or_empty_name() {
        let store = store().await;
        store.upsert(&rel("A", "knows", "B")).await.unwrap();

        assert!(store.traverse("Zed", 2, 15).await.unwrap().is_empty());
        assert!(store.traverse("   ", 2, 15).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_and_stats() {
        let store = store().await;
        store.upsert(&rel("Paris", "capital of", "France")).await.unwrap();
        store.upsert(&rel("Berlin", "capital of", "Germany")).await.unwrap();

        let snapshot = store.snapshot(100).await.unwrap();
        assert_eq!(snapshot.nodes.len(), 4);
        assert_eq!(snapshot.nodes[0].label, "Paris");
        assert_eq!(snapshot.nodes[0].node_type, "Entity");
        assert_eq!(
            snapshot.edges[1],
            GraphEdge {
                source: "Berlin".to_string(),
                label: "CAPITAL_OF".to_string(),
                target: "Germany".to_string(),
            }
        );

        let limited = store.snapshot(1).await.unwrap();
        assert_eq!(limited.nodes.len(), 1);
        assert_eq!(limited.edges.len(), 1);

        let unbounded = store.snapshot(usize::MAX).await.unwrap();
        assert_eq!(unbounded.nodes.len(), 4);
        assert_eq!(unbounded.edges.len(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.sample_entities, vec!["Paris", "France", "Berlin", "Germany"]);
    }

    #[tokio::test]
    async fn test_sanitized_type_is_stored() {
        let store = store().await;
        store.upsert(&rel("Ann", "lives in; DROP", "Oslo")).await.unwrap();

        let snapshot = store.snapshot(10).await.unwrap();
        assert_eq!(snapshot.edges[0].label, "LIVES_IN_DROP");
        assert_eq!(
            RelationType::sanitize(&snapshot.edges[0].label)
                .unwrap()
                .as_str(),
            "LIVES_IN_DROP"
        );
    }

    #[tokio::test]
    async fn test_connection_retries_are_bounded() {
        let store = SqliteGraphStore::new(&GraphStoreConfig {
            url: "sqlite:///nonexistent-hybridrag-dir/nested/graph.db".to_string(),
            max_connections: 1,
            connect_attempts: 3,
            connect_backoff_ms: 0,
        });

        let err = store.stats().await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(ref msg) if msg.contains("3 attempts")));
    }
}
