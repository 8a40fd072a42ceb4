/// Largest size with the image's aspect ratio that fits in `fit_width`x`fit_height`.
///
/// The constrained side keeps the box size; the other side is rounded half
/// away from zero. A zero-sized source yields `(0, 0)`.
pub fn fit_dimensions(image_width: u32, image_height: u32, fit_width: u32, fit_height: u32) -> (u32, u32) {
    if image_width == 0 || image_height == 0 {
        return (0, 0);
    }

    let (iw, ih) = (image_width as u64, image_height as u64);
    let (fw, fh) = (fit_width as u64, fit_height as u64);

    if iw * fh > fw * ih {
        // Constrained by width
        let height = (fw as f64 * ih as f64 / iw as f64).round();
        (fit_width, height as u32)
    } else {
        // Constrained by height
        let width = (fh as f64 * iw as f64 / ih as f64).round();
        (width as u32, fit_height)
    }
}
