mod test_data;

#[cfg(test)]
mod tests {
    use super::test_data::{synthetic_survey, LAYERS};
    use ocmap::{
        blocking::{assign_folds, block_size_from_range},
        config::BlockShape,
        forest::{ImportanceMode, QrfParams},
        redundancy::{reduce, RedundancyParams},
        screening::{screen, ScreeningParams},
        selection::{forward_select, SelectionParams},
    };

    fn names() -> Vec<String> {
        LAYERS.iter().map(|s| s.to_string()).collect()
    }

    fn selection_params() -> SelectionParams {
        SelectionParams {
            mtry_candidates: vec![1, 2],
            search_forest: QrfParams {
                n_trees: 25,
                ..Default::default()
            },
            final_forest: QrfParams {
                n_trees: 40,
                importance: ImportanceMode::Permutation,
                ..Default::default()
            },
            search_seed: 3,
            final_seed: 4,
        }
    }

    #[test]
    fn test_screening_keeps_signal_and_drops_noise() {
        let (table, _) = synthetic_survey(150, 1);
        let params = ScreeningParams {
            max_runs: 20,
            n_trees: 40,
            ..Default::default()
        };
        let result = screen(&names(), table.covariates(), table.response(), &params, 5).unwrap();
        let confirmed = result.confirmed();
        println!("Confirmed {:?}, tentative {:?}", confirmed, result.tentative());

        assert!(confirmed.contains(&"bathy".to_string()));
        assert!(!confirmed.contains(&"noise_a".to_string()));
        assert!(!confirmed.contains(&"noise_b".to_string()));
    }

    #[test]
    fn test_redundancy_drops_rescaled_copy() {
        let (table, _) = synthetic_survey(150, 2);
        let result = reduce(&names(), table.covariates(), &RedundancyParams::default()).unwrap();
        println!("Retained {:?} at threshold {}", result.retained, result.threshold);

        let bathy_like = result
            .retained
            .iter()
            .filter(|n| n.starts_with("bathy"))
            .count();
        assert_eq!(bathy_like, 1);
        assert!(result.retained.contains(&"temp".to_string()));
        assert!(result.max_vif <= 2.5);
    }

    #[test]
    fn test_spatial_selection_on_survey() {
        let (table, _) = synthetic_survey(160, 3);
        let candidates = vec!["bathy".to_string(), "temp".to_string(), "noise_a".to_string()];
        let x = table.select(&candidates).unwrap();
        let block_size = block_size_from_range(10_000.0, 0.3);
        let folds = assign_folds(table.coords(), 5, block_size, BlockShape::Square, 8).unwrap();

        let result = forward_select(
            &candidates,
            x.view(),
            table.response(),
            &folds,
            &selection_params(),
        )
        .unwrap();
        println!(
            "Selected {:?} with mtry {} and CV R² {:.3}",
            result.selected, result.mtry, result.cv_r2
        );

        assert!(result.selected.contains(&"bathy".to_string()));
        assert!(result.cv_r2 > 0.2);
        assert!(result.mtry <= result.selected.len());
        assert_eq!(result.model.feature_names(), result.selected.as_slice());
        assert_eq!(result.oof_predictions.len(), table.len());

        // The adopted score never decreases along the trace.
        let adopted: Vec<f64> = result
            .trace
            .iter()
            .filter(|s| s.adopted)
            .map(|s| s.score)
            .collect();
        assert!(adopted.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_selection_reproducible_across_shapes() {
        let (table, _) = synthetic_survey(120, 4);
        let candidates = vec!["bathy".to_string(), "temp".to_string()];
        let x = table.select(&candidates).unwrap();
        let folds =
            assign_folds(table.coords(), 4, 4000.0, BlockShape::Hexagon, 2).unwrap();

        let a = forward_select(&candidates, x.view(), table.response(), &folds, &selection_params())
            .unwrap();
        let b = forward_select(&candidates, x.view(), table.response(), &folds, &selection_params())
            .unwrap();
        assert_eq!(a.selected, b.selected);
        assert_eq!(a.mtry, b.mtry);
        assert_eq!(a.cv_r2, b.cv_r2);
    }
}
