use std::path::PathBuf;

use anyhow::{Context, Result};
use plotters::prelude::*;

use crate::rules::model::AnalyzedRules;
use crate::rules::project::Projection;
use crate::rules::similarity::SimilarityMatrix;

/// Cell-value annotations get unreadable past this many rules.
const ANNOTATE_LIMIT: usize = 12;

type Canvas<'a> = DrawingArea<BitMapBackend<'a>, plotters::coord::Shift>;

/// Render the pairwise similarity matrix as a heatmap, rule names on
/// both axes, row 0 at the top. An empty matrix still produces a
/// blank image rather than an error.
///
/// Adapted from the plotters
/// [histogram example](https://github.com/plotters-rs/plotters/blob/master/plotters/examples/histogram.rs)
/// layout conventions.
pub fn plot_similarity_heatmap(
    matrix: &SimilarityMatrix,
    output_path: PathBuf,
    width: u32,
    height: u32,
    caption: &str,
) -> Result<PathBuf> {
    // Bracing in this block just to assure the BC that the borrow
    // of output_path is dropped before returning.
    {
        let root = BitMapBackend::new(&output_path, (width, height)).into_drawing_area();
        root.fill(&WHITE)
            .with_context(|| "plot_similarity_heatmap(): fill background")?;
        if !matrix.is_empty() {
            draw_heatmap(&root, matrix, caption)?;
        }
    }
    Ok(output_path)
}

fn draw_heatmap(root: &Canvas<'_>, matrix: &SimilarityMatrix, caption: &str) -> Result<()> {
    let n = matrix.len();
    let names = matrix.names();
    let caption_style = FontDesc::from(("sans-serif", 32));
    let label_style = FontDesc::from(("sans-serif", 16));

    let mut ctx = ChartBuilder::on(root)
        .caption(format!("{} ({} rules)", caption, n), caption_style)
        .x_label_area_size(80)
        .y_label_area_size(100)
        .margin(10)
        .build_cartesian_2d(0f32..n as f32, 0f32..n as f32)
        .with_context(|| "draw_heatmap(): build_cartesian_2d")?;

    let name_at = |coordinate: &f32, from_top: bool| {
        let mut idx = coordinate.floor() as usize;
        if from_top {
            idx = n.saturating_sub(idx + 1);
        }
        names.get(idx).map(|r| r.to_string()).unwrap_or_default()
    };
    ctx.configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(n)
        .x_label_style(label_style.clone())
        .x_label_formatter(&|x| name_at(x, false))
        .y_labels(n)
        .y_label_style(label_style)
        .y_label_formatter(&|y| name_at(y, true))
        .draw()
        .with_context(|| "draw_heatmap(): draw mesh")?;

    let values = matrix.values();
    ctx.draw_series((0..n).flat_map(|i| {
        (0..n).map(move |j| {
            // Row 0 renders at the top.
            let y = (n - 1 - i) as f32;
            Rectangle::new(
                [(j as f32, y), (j as f32 + 1.0, y + 1.0)],
                heat_color(values[[i, j]]).filled(),
            )
        })
    }))
    .with_context(|| "draw_heatmap(): draw cells")?;

    if n <= ANNOTATE_LIMIT {
        ctx.draw_series((0..n).flat_map(|i| {
            (0..n).map(move |j| {
                let value = values[[i, j]];
                let color = if value > 0.5 { WHITE } else { BLACK };
                Text::new(
                    format!("{:.2}", value),
                    (j as f32 + 0.35, (n - 1 - i) as f32 + 0.55),
                    FontDesc::from(("sans-serif", 14)).color(&color),
                )
            })
        }))
        .with_context(|| "draw_heatmap(): annotate cells")?;
    }
    Ok(())
}

/// Render the 2-D projection as a scatter, points colored by cluster
/// and annotated with their rule names.
pub fn plot_projection(
    projection: &Projection,
    rules: &AnalyzedRules,
    output_path: PathBuf,
    width: u32,
    height: u32,
    caption: &str,
) -> Result<PathBuf> {
    {
        let root = BitMapBackend::new(&output_path, (width, height)).into_drawing_area();
        root.fill(&WHITE)
            .with_context(|| "plot_projection(): fill background")?;
        if !projection.is_empty() {
            draw_projection(&root, projection, rules, caption)?;
        }
    }
    Ok(output_path)
}

fn draw_projection(
    root: &Canvas<'_>,
    projection: &Projection,
    rules: &AnalyzedRules,
    caption: &str,
) -> Result<()> {
    let (x_range, y_range) = padded_ranges(projection);
    let caption_style = FontDesc::from(("sans-serif", 32));
    let label_style = FontDesc::from(("sans-serif", 14));

    let mut ctx = ChartBuilder::on(root)
        .caption(caption, caption_style)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .margin(10)
        .build_cartesian_2d(x_range, y_range)
        .with_context(|| "draw_projection(): build_cartesian_2d")?;

    ctx.configure_mesh()
        .draw()
        .with_context(|| "draw_projection(): draw mesh")?;

    ctx.draw_series(projection.iter().zip(rules.iter()).map(|(&(x, y), rule)| {
        let color = Palette99::pick(usize::from(rule.cluster_id));
        Circle::new((x, y), 5, color.filled())
    }))
    .with_context(|| "draw_projection(): draw points")?;

    ctx.draw_series(projection.iter().zip(rules.iter()).map(|(&(x, y), rule)| {
        Text::new(rule.name.to_string(), (x, y), label_style.clone())
    }))
    .with_context(|| "draw_projection(): draw labels")?;
    Ok(())
}

/// YlGnBu-ish ramp over similarity in [-1, 1].
fn heat_color(similarity: f32) -> RGBColor {
    let t = ((similarity + 1.0) / 2.0).clamp(0.0, 1.0);
    let stops: [(f32, (u8, u8, u8)); 3] = [
        (0.0, (255, 255, 217)),
        (0.5, (65, 182, 196)),
        (1.0, (8, 29, 88)),
    ];
    let (lo, hi) = if t < 0.5 {
        (stops[0], stops[1])
    } else {
        (stops[1], stops[2])
    };
    let span = hi.0 - lo.0;
    let frac = if span > 0.0 { (t - lo.0) / span } else { 0.0 };
    let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * frac).round() as u8;
    RGBColor(
        lerp(lo.1.0, hi.1.0),
        lerp(lo.1.1, hi.1.1),
        lerp(lo.1.2, hi.1.2),
    )
}

/// Plot ranges with a margin so labels don't clip; degenerate spans
/// get a unit pad.
fn padded_ranges(projection: &Projection) -> (std::ops::Range<f32>, std::ops::Range<f32>) {
    let (mut min_x, mut max_x, mut min_y, mut max_y) =
        (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
    for &(x, y) in projection.iter() {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    let pad = |min: f32, max: f32| {
        let span = max - min;
        if span > 0.0 {
            (min - span * 0.1)..(max + span * 0.1)
        } else {
            (min - 1.0)..(max + 1.0)
        }
    };
    (pad(min_x, max_x), pad(min_y, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_color_endpoints() {
        assert_eq!(heat_color(-1.0), RGBColor(255, 255, 217));
        assert_eq!(heat_color(0.0), RGBColor(65, 182, 196));
        assert_eq!(heat_color(1.0), RGBColor(8, 29, 88));
    }

    #[test]
    fn test_padded_ranges_degenerate() {
        let projection = Projection::from(vec![(2.0, 3.0)]);
        let (x, y) = padded_ranges(&projection);
        assert_eq!(x, 1.0..3.0);
        assert_eq!(y, 2.0..4.0);
    }
}
