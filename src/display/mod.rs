use ndarray::ArrayView1;

const COLUMN_WIDTH: usize = 3;

/// Renders singular values as an ASCII bar chart.
///
/// The first line gives the leading component's share of the singular value sum in
/// percent. Below it `rows` lines of bars, scaled so the leading component fills
/// the full height, then an axis line. At most `max_components` bars are drawn.
pub fn scree_chart(singular_values: ArrayView1<f64>, max_components: usize, rows: usize) -> String {
    let total: f64 = singular_values.sum();
    let n = singular_values.len().min(max_components);
    if n == 0 || !(total > 0.0) {
        return "no variance to display".to_string();
    }

    let leading = singular_values[0];
    let heights: Vec<usize> = singular_values
        .iter()
        .take(n)
        .map(|&s| ((s / leading) * rows as f64).round().max(0.0) as usize)
        .collect();

    let mut out = format!("PC1 {:.1}% of total\n", 100.0 * leading / total);
    for level in (1..=rows).rev() {
        let line: String = heights
            .iter()
            .map(|&h| if h >= level { " # " } else { "   " })
            .collect();
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.push_str(&"-".repeat(n * COLUMN_WIDTH));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_chart_layout() {
        let s = array![4.0, 2.0, 1.0, 1.0];
        let chart = scree_chart(s.view(), 8, 4);
        let lines: Vec<&str> = chart.lines().collect();

        assert_eq!(lines.len(), 4 + 2);
        assert_eq!(lines[0], "PC1 50.0% of total");
        // Top row: only the leading bar reaches full height.
        assert_eq!(lines[1], " #");
        // Half height for the second component.
        assert_eq!(lines[3], " #  #");
        assert_eq!(lines[4], " #  #  #  #");
        assert_eq!(lines[5], "-".repeat(12));
    }

    #[test]
    fn test_max_components_caps_columns() {
        let s = array![5.0, 4.0, 3.0, 2.0, 1.0];
        let chart = scree_chart(s.view(), 2, 3);
        assert!(chart.lines().last().unwrap().len() == 6);
        assert!(chart.lines().all(|l| l.matches('#').count() <= 2));
    }

    #[test]
    fn test_degenerate_input() {
        let zeros = array![0.0, 0.0];
        assert_eq!(scree_chart(zeros.view(), 8, 10), "no variance to display");
        let empty = ndarray::Array1::<f64>::zeros(0);
        assert_eq!(scree_chart(empty.view(), 8, 10), "no variance to display");
    }
}
