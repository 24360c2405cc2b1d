use std::collections::HashSet;
use std::io::Write;

use olap_cube::{
    AggregateOp, Cube, CubeBuilder, CubeConfig, CubeError, CubeQuery, CubeSpec, DimensionSpec,
    Extremum, FactBatch, LoadOptions, MetricSpec, Value, build_cube, extremum, load_cube,
    load_facts, sum_by_dimension_value, write_cube_to_dir,
};
use tempfile::{NamedTempFile, TempDir};

fn load(csv: &str) -> FactBatch {
    let mut tmp = NamedTempFile::new().unwrap();
    write!(tmp, "{}", csv).unwrap();
    let (batch, summary) = load_facts(tmp.path(), &LoadOptions::default()).unwrap();
    assert!(summary.errors.is_empty());
    batch
}

const SALES: &str = "sale_id,sale_date,store_id,sale_amount,payment_type\n\
                     1,2024-03-01,1,10,cash\n\
                     2,2024-03-01,2,20,card\n\
                     3,2024-03-02,1,5,cash\n";

fn amount_metrics() -> MetricSpec {
    MetricSpec::new().metric("sale_amount", [AggregateOp::Sum, AggregateOp::Mean])
}

fn by_payment_type(batch: &FactBatch) -> Result<Cube, CubeError> {
    build_cube(batch, &DimensionSpec::new(["payment_type"]), &amount_metrics())
}

#[test]
fn test_cash_card_cube() {
    let batch = load(SALES);
    let cube = by_payment_type(&batch).unwrap();

    assert_eq!(
        cube.columns(),
        ["payment_type", "sale_amount_sum", "sale_amount_mean", "sale_ids"]
    );
    assert_eq!(cube.len(), 2);

    let card = &cube.rows()[0];
    assert_eq!(card.dimensions, vec![Value::from("card")]);
    assert_eq!(card.metrics, vec![Some(Value::Int(20)), Some(Value::Float(20.0))]);
    assert_eq!(card.record_ids, vec![2]);

    let cash = &cube.rows()[1];
    assert_eq!(cash.dimensions, vec![Value::from("cash")]);
    assert_eq!(cash.metrics, vec![Some(Value::Int(15)), Some(Value::Float(7.5))]);
    assert_eq!(cash.record_ids, vec![1, 3]);
}

#[test]
fn test_missing_dimension_value_is_excluded() {
    let batch = load(
        "sale_id,sale_amount,payment_type\n\
         1,10,cash\n\
         2,20,\n\
         3,5,cash\n",
    );
    let cube = by_payment_type(&batch).unwrap();

    assert_eq!(cube.len(), 1);
    assert_eq!(cube.rows()[0].record_ids, vec![1, 3]);
    assert_eq!(cube.traced_records(), 2);
}

#[test]
fn test_only_missing_dimension_values_is_empty_input() {
    let batch = load("sale_id,sale_amount,payment_type\n1,10,\n2,20,\n");
    let err = by_payment_type(&batch).unwrap_err();
    assert!(matches!(err, CubeError::EmptyInput));
}

#[test]
fn test_numeric_looking_codes_keep_every_record() {
    let batch = load(
        "sale_id,product_code,sale_amount\n\
         1,101,10\n\
         2,A7,20\n\
         3,B9,5\n\
         4,101,1\n",
    );
    assert_eq!(batch.len(), 4);

    let metrics = MetricSpec::new().metric("sale_amount", [AggregateOp::Sum]);
    let cube = build_cube(&batch, &DimensionSpec::new(["product_code"]), &metrics).unwrap();
    assert_eq!(cube.traced_records(), 4);
    assert_eq!(cube.rows()[0].dimensions, vec![Value::from("101")]);
    assert_eq!(cube.rows()[0].record_ids, vec![1, 4]);

    let dir = TempDir::new().unwrap();
    let path = write_cube_to_dir(&cube, dir.path(), "codes.csv").unwrap();
    assert_eq!(load_cube(&path, 1).unwrap(), cube);
}

#[test]
fn test_least_and_most_by_payment_type() {
    let batch = load(SALES);
    let cube = by_payment_type(&batch).unwrap();

    let totals = sum_by_dimension_value(&cube, "payment_type", "sale_amount_sum").unwrap();
    assert_eq!(extremum(&totals, Extremum::Min).unwrap(), (Value::from("cash"), 15.0));
    assert_eq!(extremum(&totals, Extremum::Max).unwrap(), (Value::from("card"), 20.0));
}

#[test]
fn test_multi_key_cube_properties() {
    let mut csv = String::from("sale_id,store_id,sale_amount,payment_type\n");
    let types = ["cash", "card", "check"];
    for id in 1..=60 {
        let amount = (id * 7) % 23 + 1;
        csv.push_str(&format!("{id},{},{amount},{}\n", id % 4, types[id % 3]));
    }
    let batch = load(&csv);

    let dims = DimensionSpec::new(["payment_type", "store_id"]);
    let metrics = MetricSpec::new().metric(
        "sale_amount",
        [AggregateOp::Sum, AggregateOp::Mean, AggregateOp::Count],
    );
    let cube = build_cube(&batch, &dims, &metrics).unwrap();

    // one row per distinct (payment_type, store_id)
    let distinct: HashSet<(String, i64)> = (1..=60)
        .map(|id: usize| (types[id % 3].to_string(), (id % 4) as i64))
        .collect();
    assert_eq!(cube.len(), distinct.len());
    assert_eq!(cube.traced_records(), 60);

    let sum_idx = cube.metric_index("sale_amount_sum").unwrap();
    let mean_idx = cube.metric_index("sale_amount_mean").unwrap();
    let count_idx = cube.metric_index("sale_amount_count").unwrap();
    for row in cube.rows() {
        let count = row.metrics[count_idx].as_ref().and_then(Value::as_f64).unwrap();
        assert_eq!(count as usize, row.record_ids.len());

        let sum = row.metrics[sum_idx].as_ref().and_then(Value::as_f64).unwrap();
        let mean = row.metrics[mean_idx].as_ref().and_then(Value::as_f64).unwrap();
        assert!((sum - mean * count).abs() < 1e-9);

        // every traced record carries the row's key
        for id in &row.record_ids {
            let id = *id as usize;
            assert_eq!(row.dimensions[0], Value::from(types[id % 3]));
            assert_eq!(row.dimensions[1], Value::Int((id % 4) as i64));
        }
    }

    assert!(cube.rows().windows(2).all(|w| w[0].dimensions < w[1].dimensions));
}

#[test]
fn test_builds_are_stable() {
    let batch = load(SALES);
    let dims = DimensionSpec::new(["payment_type", "store_id"]);
    let metrics = amount_metrics();

    let parallel = CubeBuilder::new(CubeConfig { parallel: true })
        .build(&batch, &dims, &metrics)
        .unwrap();
    for _ in 0..5 {
        let sequential = CubeBuilder::new(CubeConfig { parallel: false })
            .build(&batch, &dims, &metrics)
            .unwrap();
        assert_eq!(sequential, parallel);
    }
}

#[test]
fn test_export_reload_and_report() {
    let batch = load(SALES);
    let cube = by_payment_type(&batch).unwrap();

    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("olap_cubing_outputs");
    let path = write_cube_to_dir(&cube, &out_dir, "multidimensional_olap_cube.csv").unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("cash,15,7.5,\"[1, 3]\""));

    let reloaded = load_cube(&path, 1).unwrap();
    assert_eq!(reloaded, cube);

    let query = CubeQuery::new(&reloaded);
    assert_eq!(
        query.least("payment_type", "sale_amount_sum").unwrap(),
        (Value::from("cash"), 15.0)
    );
    assert_eq!(
        query.most("payment_type", "sale_amount_sum").unwrap(),
        (Value::from("card"), 20.0)
    );
}

#[test]
fn test_json_spec() {
    let spec = CubeSpec::from_json(
        r#"{
            "dimensions": ["payment_type"],
            "metrics": {"sale_amount": ["sum", "max"], "sale_id": "count"}
        }"#,
    )
    .unwrap();

    let batch = load(SALES);
    let cube = build_cube(&batch, &spec.dimensions, &spec.metrics).unwrap();
    assert_eq!(
        cube.columns(),
        ["payment_type", "sale_amount_sum", "sale_amount_max", "sale_id_count", "sale_ids"]
    );
    assert_eq!(
        cube.rows()[1].metrics,
        vec![Some(Value::Int(15)), Some(Value::Int(10)), Some(Value::Int(2))]
    );
}

#[test]
fn test_unsupported_function_in_spec() {
    let err = CubeSpec::from_json(r#"{"dimensions": ["a"], "metrics": {"b": "median"}}"#)
        .unwrap_err();
    assert!(matches!(err, CubeError::UnsupportedAggregation(name) if name == "median"));
}
