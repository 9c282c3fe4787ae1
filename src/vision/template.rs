//! Template matching by zero-mean normalized cross-correlation.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use imageproc::template_matching::find_extremes;

use super::{TemplateLocator, TemplateMatch, VisionError};

/// [`TemplateLocator`] scoring every placement with the correlation
/// coefficient of grayscale pixels (OpenCV `TM_CCOEFF_NORMED`).
///
/// Both the template and each window have their mean removed before
/// correlating, so flat or uniformly bright areas score 0 rather than
/// close to 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct NccTemplateLocator;

impl TemplateLocator for NccTemplateLocator {
    fn locate(
        &self,
        screen: &DynamicImage,
        template: &DynamicImage,
    ) -> Result<Option<TemplateMatch>, VisionError> {
        let screen = screen.to_luma8();
        let template = template.to_luma8();

        if template.width() == 0
            || template.height() == 0
            || template.width() > screen.width()
            || template.height() > screen.height()
        {
            tracing::debug!(
                "Template {}x{} does not fit screen {}x{}",
                template.width(),
                template.height(),
                screen.width(),
                screen.height()
            );
            return Ok(None);
        }

        let scores = correlation_coefficients(&screen, &template);
        let extremes = find_extremes(&scores);
        let (x, y) = extremes.max_value_location;

        Ok(Some(TemplateMatch {
            x,
            y,
            width: template.width(),
            height: template.height(),
            score: extremes.max_value,
        }))
    }
}

/// Correlation coefficient of `template` against every window of `screen`.
///
/// The result has one pixel per top-left placement. Windows or templates
/// with zero variance score 0.
fn correlation_coefficients(
    screen: &GrayImage,
    template: &GrayImage,
) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let (tw, th) = template.dimensions();
    let n = f64::from(tw) * f64::from(th);

    let template_mean = template.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let centered: Vec<f64> = template
        .pixels()
        .map(|p| f64::from(p[0]) - template_mean)
        .collect();
    let template_energy: f64 = centered.iter().map(|v| v * v).sum();

    let sums = integral_image::<_, u64>(screen);
    let squares = integral_squared_image::<_, u64>(screen);

    let out_w = screen.width() - tw + 1;
    let out_h = screen.height() - th + 1;

    ImageBuffer::from_fn(out_w, out_h, |x, y| {
        let (right, bottom) = (x + tw - 1, y + th - 1);
        let sum = sum_image_pixels(&sums, x, y, right, bottom)[0] as f64;
        let sum_sq = sum_image_pixels(&squares, x, y, right, bottom)[0] as f64;
        let window_energy = sum_sq - sum * sum / n;

        let denominator = (template_energy * window_energy).sqrt();
        if denominator <= f64::EPSILON {
            return Luma([0.0]);
        }

        // the template is centered, so the window mean drops out
        let mut numerator = 0.0;
        for ty in 0..th {
            let row = (ty * tw) as usize;
            for tx in 0..tw {
                let pixel = f64::from(screen.get_pixel(x + tx, y + ty)[0]);
                numerator += pixel * centered[row + tx as usize];
            }
        }

        Luma([(numerator / denominator).clamp(-1.0, 1.0) as f32])
    })
}
