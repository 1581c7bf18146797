use cohort::{
    agreement, analyze, suggest, AlgorithmParams, CentroidParams, ClusterModel, DensityParams,
    Error, Evaluator, FeatureMatrix, FeatureSpec, Grouper, GroupingConfig, GroupingModel,
    GroupingPipeline, Labeling, RawRecord, SoftClustering, NOISE,
};
use proptest::prelude::*;
use rand::prelude::*;
use rand::Rng;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record(pairs: &[(&str, String)]) -> RawRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// 100 employees drawn around three profiles.
fn employees(seed: u64) -> Vec<RawRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let profiles = [(2.5, 1.0, 3.0, 40.0), (3.5, 5.0, 4.0, 60.0), (4.5, 12.0, 4.5, 90.0)];
    let departments = ["IT", "HR", "Sales", "Marketing"];
    (0..100)
        .map(|i| {
            let (perf, exp, skills, salary) = profiles[i % 3];
            let jitter = |rng: &mut StdRng, scale: f64| (rng.random::<f64>() - 0.5) * scale;
            record(&[
                ("performance", format!("{:.3}", perf + jitter(&mut rng, 0.4))),
                ("experience", format!("{:.3}", exp + jitter(&mut rng, 1.0))),
                ("skills", format!("{:.3}", skills + jitter(&mut rng, 0.4))),
                ("salary", format!("{:.1}", salary + jitter(&mut rng, 5.0))),
                ("department", departments[rng.random_range(0..4)].to_string()),
            ])
        })
        .collect()
}

fn numeric_spec() -> FeatureSpec {
    FeatureSpec::all_numeric(["performance", "experience", "skills", "salary"])
}

#[test]
fn test_fixed_seed_runs_are_byte_identical() {
    init_tracing();
    let records = employees(1);
    let matrix = cohort::prepare(&records, &numeric_spec()).unwrap();
    assert_eq!(matrix.nrows(), 100);
    assert_eq!(matrix.ncols(), 4);

    let config = GroupingConfig::builder()
        .centroid()
        .fixed_groups(3)
        .random_seed(42)
        .build()
        .unwrap();

    let (first, _) = Grouper::new(config.clone()).fit_predict(&matrix).unwrap();
    let (second, _) = Grouper::new(config).fit_predict(&matrix).unwrap();

    assert_eq!(first.len(), 100);
    assert_eq!(first.n_groups(), 3);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn test_recovers_planted_profiles() {
    let records = employees(2);
    let matrix = cohort::prepare(&records, &numeric_spec()).unwrap();
    let config = GroupingConfig::builder().build().unwrap();
    let mut grouper = Grouper::new(config);
    let (labels, _) = grouper.fit_predict(&matrix).unwrap();

    let truth = Labeling::compact((0..100).map(|i| i % 3).collect());
    assert_eq!(labels.n_groups(), 3);
    assert!((agreement(&labels, &truth).unwrap() - 1.0).abs() < 1e-9);

    let report = grouper.evaluate().unwrap();
    assert!(report.silhouette.unwrap() > 0.5);
    assert!(report.size_balance.unwrap() < 1.1);
}

#[test]
fn test_constant_feature_scores_zero() {
    let mut records = employees(3);
    for r in &mut records {
        r.insert("site".to_string(), "7".to_string());
    }
    let spec = numeric_spec().numeric("site");
    let matrix = cohort::prepare(&records, &spec).unwrap();
    let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
    let (labels, _) = Grouper::new(config).fit_predict(&matrix).unwrap();

    let report = analyze(&matrix, &labels, &spec).unwrap();
    assert_eq!(report.get("site"), Some(0.0));
    assert!((report.total() - 1.0).abs() < 1e-9);
    assert!(report.scores().iter().all(|s| s.score >= 0.0));
}

#[test]
fn test_empty_candidate_range() {
    assert!(matches!(
        GroupingConfig::builder().candidate_range([]).build(),
        Err(Error::EmptyCandidateRange { .. })
    ));

    let matrix = cohort::prepare(&employees(4), &numeric_spec()).unwrap();
    let params = AlgorithmParams::Centroid(CentroidParams::default());
    assert!(matches!(
        suggest(&matrix, &[], &params, 42),
        Err(Error::EmptyCandidateRange { .. })
    ));
}

#[test]
fn test_pipeline_with_mixed_features_and_missing_values() {
    init_tracing();
    let mut records = employees(5);
    records[0].insert("performance".to_string(), "".to_string());
    records[1].insert("department".to_string(), "  ".to_string());

    let spec = numeric_spec().categorical("department");
    let config = GroupingConfig::builder().candidate_range(2..=6).build().unwrap();
    let report = GroupingPipeline::new(spec.clone(), config).run(&records).unwrap();

    assert_eq!(report.labeling.len(), 100);
    assert_eq!(report.profiles.len(), report.labeling.n_groups());
    assert_eq!(report.importance.len(), spec.len());
    assert!(report.profiles.iter().all(|p| p.dominant.len() <= 3));
    assert!(report.model.importance().is_some());

    // Round trip the model and group the same employees again.
    let mut buf = Vec::new();
    report.model.save(&mut buf).unwrap();
    let model = GroupingModel::load(buf.as_slice()).unwrap();
    assert_eq!(model.predict(&records).unwrap(), report.labeling);

    let stranger = record(&[
        ("performance", "4.5".to_string()),
        ("experience", "12".to_string()),
        ("skills", "4.5".to_string()),
        ("salary", "90".to_string()),
        ("department", "Legal".to_string()),
    ]);
    let label = model.predict(&[stranger]).unwrap();
    assert!(label.as_slice()[0] < model.n_groups());
}

#[test]
fn test_hire_date_feeds_tenure() {
    let reference = chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let mut records = employees(10);
    for (i, r) in records.iter_mut().enumerate() {
        // Hire year follows the experience profile.
        let year = [2023, 2019, 2012][i % 3];
        r.insert("hire_date".to_string(), format!("{year}-0{}-15", 1 + i % 9));
    }
    records[7].insert("hire_date".to_string(), String::new());

    let spec = numeric_spec().date("hire_date", reference);
    let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
    let report = GroupingPipeline::new(spec.clone(), config).run(&records).unwrap();

    assert_eq!(report.labeling.len(), 100);
    assert!(report.importance.get("hire_date").unwrap() > 0.0);
    assert!(report.profiles[0].stat("hire_date").is_some());

    let mut buf = Vec::new();
    report.model.save(&mut buf).unwrap();
    let model = GroupingModel::load(buf.as_slice()).unwrap();
    assert_eq!(model.preparer().spec(), &spec);
    assert_eq!(model.predict(&records).unwrap(), report.labeling);

    records[3].insert("hire_date".to_string(), "March 2019".to_string());
    assert!(matches!(
        model.predict(&records),
        Err(Error::InvalidValue { record: 3, .. })
    ));
}

#[test]
fn test_schema_errors_abort() {
    let mut records = employees(6);
    records[10].remove("skills");
    assert!(matches!(
        cohort::prepare(&records, &numeric_spec()),
        Err(Error::SchemaMismatch { record: 10, .. })
    ));

    let mut records = employees(6);
    records[3].insert("salary".to_string(), "lots".to_string());
    assert!(matches!(
        cohort::prepare(&records, &numeric_spec()),
        Err(Error::InvalidValue { record: 3, .. })
    ));
}

#[test]
fn test_density_with_estimated_parameters() {
    let matrix = cohort::prepare(&employees(7), &numeric_spec()).unwrap();
    let params = DensityParams::estimate(&matrix).unwrap();
    assert!(params.epsilon > 0.0);
    assert_eq!(params.min_points, 3);

    let config = GroupingConfig::builder()
        .algorithm(AlgorithmParams::Density(params))
        .build()
        .unwrap();
    let mut grouper = Grouper::new(config);
    let (labels, fitted) = grouper.fit_predict(&matrix).unwrap();
    assert_eq!(labels.len(), 100);
    assert!(labels.n_groups() >= 1);
    assert_eq!(grouper.predict(&matrix).unwrap().len(), 100);
    assert!(fitted.as_mixture().is_none());

    let report = Evaluator::new().evaluate(&matrix, &labels).unwrap();
    assert_eq!(report.n_noise, labels.as_slice().iter().filter(|&&l| l == NOISE).count());
}

#[test]
fn test_mixture_probabilities() {
    let matrix = cohort::prepare(&employees(8), &numeric_spec()).unwrap();
    let config = GroupingConfig::builder()
        .distribution()
        .fixed_groups(3)
        .build()
        .unwrap();
    let (labels, fitted) = Grouper::new(config).fit_predict(&matrix).unwrap();
    let mixture = fitted.as_mixture().unwrap();

    let proba = mixture.predict_proba(matrix.view()).unwrap();
    assert_eq!(proba.len(), 100);
    for (row, &label) in proba.iter().zip(labels.as_slice()) {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let argmax = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(argmax, label);
    }
    assert!(fitted.convergence_warning().is_none());
}

#[test]
fn test_single_group_evaluation() {
    let matrix = cohort::prepare(&employees(9), &numeric_spec()).unwrap();
    let config = GroupingConfig::builder().fixed_groups(1).build().unwrap();
    let (labels, _) = Grouper::new(config).fit_predict(&matrix).unwrap();

    let report = cohort::evaluate(&matrix, &labels).unwrap();
    assert!(report.cohesion.is_some());
    assert!(report.separation.is_none());
    assert!(matches!(
        Evaluator::new().require_separation(true).evaluate(&matrix, &labels),
        Err(Error::DegenerateLabeling { n_groups: 1 })
    ));
}

fn algorithms() -> impl Strategy<Value = AlgorithmParams> {
    prop_oneof![
        Just(AlgorithmParams::Centroid(CentroidParams::default())),
        Just(AlgorithmParams::Density(DensityParams {
            epsilon: 1.0,
            min_points: 3,
        })),
        Just(AlgorithmParams::Distribution(Default::default())),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn labels_cover_rows_and_are_contiguous(
        rows in proptest::collection::vec(proptest::collection::vec(-20.0f64..20.0, 3), 5..40),
        algorithm in algorithms(),
        k in 1usize..5,
        seed in any::<u64>(),
    ) {
        let matrix = FeatureMatrix::from_rows(&rows).unwrap();
        let config = GroupingConfig::builder()
            .algorithm(algorithm)
            .fixed_groups(k)
            .random_seed(seed)
            .build()
            .unwrap();

        let (labels, fitted) = Grouper::new(config.clone()).fit_predict(&matrix).unwrap();
        prop_assert_eq!(labels.len(), rows.len());

        let n = labels.n_groups();
        prop_assert_eq!(n, fitted.n_groups());
        for g in 0..n {
            prop_assert!(labels.as_slice().contains(&g));
        }
        prop_assert!(labels.as_slice().iter().all(|&l| l < n || l == NOISE));
        if algorithm.takes_group_count() {
            prop_assert!(!labels.as_slice().contains(&NOISE));
            prop_assert!(n <= k);
        }

        let (again, _) = Grouper::new(config).fit_predict(&matrix).unwrap();
        prop_assert_eq!(again, labels.clone());
        prop_assert_eq!(fitted.predict(matrix.view()).unwrap(), labels);
    }
}
