mod test_data;

#[cfg(test)]
mod tests {
    use super::test_data::{quick_config, synthetic_survey, write_survey_csv, LAYERS};
    use ocmap::{
        config::{BlockShape, PipelineConfig, ThresholdMethod},
        data::Raster,
        forest::QuantileForest,
        error::Stage,
        io, pipeline, prediction, Error,
    };

    fn same_raster(a: &Raster, b: &Raster) -> bool {
        a.geometry == b.geometry
            && a
                .values
                .iter()
                .zip(b.values.iter())
                .all(|(x, y)| x.to_bits() == y.to_bits())
    }

    #[test]
    fn test_pipeline_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let (obs_path, grid_path) = write_survey_csv(dir.path(), 150, 11);
        let observations = io::read_observations(&obs_path, "toc", Some("depth")).unwrap();
        let grid = io::read_grid(&grid_path).unwrap();
        assert_eq!(observations.len(), 150);
        assert_eq!(grid.geometry().shape(), (30, 30));

        let config = quick_config();
        let output = pipeline::run(&observations, &grid, &config).unwrap();
        let summary = &output.summary;
        println!("{:#?}", summary);

        assert!(summary.n_observations < 150 && summary.n_observations > 90);
        assert_eq!(output.folds.len(), summary.n_observations);
        assert_eq!(output.folds.k(), 5);
        assert!(!output.predictors.is_empty());
        assert!(output
            .predictors
            .iter()
            .all(|p| LAYERS.contains(&p.as_str())));
        assert!(
            !(output.predictors.contains(&"bathy".to_string())
                && output.predictors.contains(&"bathy_scaled".to_string())),
            "collinear pair survived"
        );
        assert!(output.predictors.contains(&"temp".to_string()));
        assert_eq!(output.model.feature_names(), output.predictors.as_slice());
        assert!(summary.mtry >= 1 && summary.mtry <= output.predictors.len());
        assert!((summary.rmse - summary.mse.sqrt()).abs() < 1e-12);
        assert!(summary.cv_r2 > 0.2, "spatial CV R² {}", summary.cv_r2);

        // Quantile surfaces are ordered wherever a prediction exists.
        let lo = output.prediction.quantile(0.05).unwrap();
        let hi = output.prediction.quantile(0.95).unwrap();
        let median = &output.prediction.median;
        for ((l, m), h) in lo.values.iter().zip(median.values.iter()).zip(hi.values.iter()) {
            if m.is_finite() {
                assert!(l <= m && m <= h);
            } else {
                assert!(l.is_nan() && h.is_nan());
            }
        }
        assert_eq!(
            output.applicability.dissimilarity.valid_count(),
            median.valid_count()
        );
        assert!(output
            .applicability
            .mask
            .values
            .iter()
            .all(|v| v.is_nan() || *v == 0.0 || *v == 1.0));
        let pct = summary.percent_in_domain;
        assert!((0.0..=100.0).contains(&pct));

        // Outputs written the way the binary writes them read back unchanged.
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        io::write_raster_table(
            out.join("prediction.csv"),
            &[("median", median), ("in_domain", &output.applicability.mask)],
        )
        .unwrap();
        assert!(out.join("prediction.csv").exists());
        io::write_summary(out.join("summary.toml"), summary).unwrap();
        assert_eq!(&io::read_summary(out.join("summary.toml")).unwrap(), summary);

        output.model.save(out.join("model.toml")).unwrap();
        let model = QuantileForest::load(out.join("model.toml")).unwrap();
        let again = prediction::predict_grid(&model, &grid, &config.quantile_levels_for_output)
            .unwrap();
        assert!(same_raster(&again.median, median));
    }

    #[test]
    fn test_pipeline_reproducible() {
        let (observations, grid) = synthetic_survey(120, 12);
        let config = PipelineConfig {
            depth_interval_bounds: None,
            block_shape: BlockShape::Hexagon,
            applicability_threshold: ThresholdMethod::ErrorKnee,
            ..quick_config()
        };

        let a = pipeline::run(&observations, &grid, &config).unwrap();
        let b = pipeline::run(&observations, &grid, &config).unwrap();
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.summary.block_shape, BlockShape::Hexagon);
        assert!(same_raster(&a.prediction.median, &b.prediction.median));
        assert!(same_raster(&a.applicability.mask, &b.applicability.mask));
    }

    #[test]
    fn test_pipeline_rejects_invalid_config() {
        let (observations, grid) = synthetic_survey(40, 13);
        let config = PipelineConfig {
            vif_ceiling: 0.5,
            ..quick_config()
        };
        assert!(matches!(
            pipeline::run(&observations, &grid, &config),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_pipeline_too_few_observations_for_folds() {
        let (observations, grid) = synthetic_survey(4, 14);
        let config = PipelineConfig {
            depth_interval_bounds: None,
            ..quick_config()
        };
        assert!(matches!(
            pipeline::run(&observations, &grid, &config),
            Err(Error::Configuration {
                stage: Stage::Blocking,
                ..
            })
        ));
    }
}
