use proptest::prelude::*;
use sidx::catalog::schema::{ClusteringOrder, IndexDefinition, TableSchema};
use sidx::catalog::types::{ColumnType, Row};
use sidx::commit::validation::Mutation;
use sidx::config::SidxConfig;
use sidx::query::plan::{Query, col, lit};
use sidx::SidxInstance;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

async fn drain(db: &SidxInstance, query: Query, page_sizes: &[usize]) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;
    let mut turn = 0;
    loop {
        let page_size = page_sizes[turn % page_sizes.len()];
        turn += 1;
        let mut page_query = query.clone().page_size(page_size);
        if let Some(c) = &cursor {
            page_query = page_query.cursor(c);
        }
        let result = db.query(page_query).await.expect("page");
        assert!(result.rows.len() <= page_size);
        rows.extend(result.rows);
        match result.cursor {
            Some(next) => cursor = Some(next),
            None => return rows,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pages_cover_every_match_exactly_once(
        cells in prop::collection::btree_map((0_i64..12, 0_i64..12), 0_i64..3, 1..80),
        page_sizes in prop::collection::vec(1_usize..9, 1..5),
        descending in any::<bool>(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let order = if descending { ClusteringOrder::Desc } else { ClusteringOrder::Asc };
            let db = SidxInstance::open(SidxConfig::development()).expect("open");
            db.create_keyspace("ks").expect("keyspace");
            db.create_table(
                TableSchema::new("ks", "t")
                    .column("p", ColumnType::Integer)
                    .column("c", ColumnType::Integer)
                    .column("v", ColumnType::Integer)
                    .partition_key(&["p"])
                    .clustering("c", order),
            )
            .expect("table");
            for ((p, c), v) in &cells {
                db.commit(Mutation::upsert(
                    "ks",
                    "t",
                    &[("p", lit(*p)), ("c", lit(*c)), ("v", lit(*v))],
                ))
                .await
                .expect("upsert");
            }

            let filtered = Query::select(&["p", "c"])
                .from("ks", "t")
                .where_(col("v").eq(lit(1)));
            let whole = db
                .query(filtered.clone().allow_filtering().page_size(10_000))
                .await
                .expect("whole");
            let paged_scan = drain(&db, filtered.clone().allow_filtering(), &page_sizes).await;
            assert_eq!(paged_scan, whole.rows);

            db.create_index("ks", IndexDefinition::on("t", &["v"])).expect("index");
            db.wait_for_index_ready("ks", "t_v_idx", Duration::from_secs(5))
                .await
                .expect("ready");
            let paged_index = drain(&db, filtered, &page_sizes).await;
            assert_eq!(paged_index, whole.rows);

            let expected = cells.values().filter(|v| **v == 1).count();
            assert_eq!(whole.rows.len(), expected);
            db.shutdown().await;
        });
    }
}
