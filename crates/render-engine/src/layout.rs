//! Two-cell grid layout.
//!
//! The canvas is split in half either horizontally (one input above the
//! other) or vertically (side by side). Each input is scaled uniformly into
//! its cell and centered; the arrangement that leaves more of the canvas
//! covered by picture wins.

use serde::Serialize;

use duet_media_model::geometry::{fit_rect, Rect, Size};

/// How the two cells split the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridArrangement {
    /// First input on top, second below.
    Stacked,
    /// First input left, second right.
    SideBySide,
}

/// Pixel placement of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellPlacement {
    /// Whole cell, letterbox included.
    pub cell: PixelRect,
    /// Scaled picture inside the cell. Empty for inputs without video.
    pub content: PixelRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    fn to_rect(self) -> Rect {
        Rect::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }

    fn from_rect(rect: &Rect) -> Self {
        let (x, y, width, height) = rect.to_pixels();
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Final layout for one composition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub arrangement: GridArrangement,
    pub cells: [CellPlacement; 2],
    /// Fraction of the canvas covered by picture.
    pub coverage: f64,
}

impl GridLayout {
    /// Pick the arrangement that shows more of the two fitted inputs.
    ///
    /// Ties go to `Stacked` on portrait or square canvases and to
    /// `SideBySide` on landscape ones.
    pub fn choose(canvas_width: u32, canvas_height: u32, first: Size, second: Size) -> Self {
        let stacked = Self::arrange(GridArrangement::Stacked, canvas_width, canvas_height, first, second);
        let side = Self::arrange(GridArrangement::SideBySide, canvas_width, canvas_height, first, second);
        let prefer_stacked = canvas_height >= canvas_width;
        let stacked_wins = if (stacked.coverage - side.coverage).abs() < 1e-9 {
            prefer_stacked
        } else {
            stacked.coverage > side.coverage
        };
        if stacked_wins {
            stacked
        } else {
            side
        }
    }

    /// Lay the inputs out with a fixed arrangement.
    pub fn arrange(
        arrangement: GridArrangement,
        canvas_width: u32,
        canvas_height: u32,
        first: Size,
        second: Size,
    ) -> Self {
        let (a, b) = split(arrangement, canvas_width, canvas_height);
        let place = |cell: PixelRect, content: Size| CellPlacement {
            cell,
            content: PixelRect::from_rect(&fit_rect(content, &cell.to_rect())),
        };
        let cells = [place(a, first), place(b, second)];
        let canvas_area = canvas_width as f64 * canvas_height as f64;
        let covered: f64 = cells
            .iter()
            .map(|c| c.content.width as f64 * c.content.height as f64)
            .sum();
        Self {
            canvas_width,
            canvas_height,
            arrangement,
            cells,
            coverage: if canvas_area > 0.0 {
                covered / canvas_area
            } else {
                0.0
            },
        }
    }
}

fn split(arrangement: GridArrangement, width: u32, height: u32) -> (PixelRect, PixelRect) {
    match arrangement {
        GridArrangement::Stacked => {
            let top = height / 2;
            (
                PixelRect {
                    x: 0,
                    y: 0,
                    width,
                    height: top,
                },
                PixelRect {
                    x: 0,
                    y: top,
                    width,
                    height: height - top,
                },
            )
        }
        GridArrangement::SideBySide => {
            let left = width / 2;
            (
                PixelRect {
                    x: 0,
                    y: 0,
                    width: left,
                    height,
                },
                PixelRect {
                    x: left,
                    y: 0,
                    width: width - left,
                    height,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn landscape_inputs_stack_on_portrait_canvas() {
        let layout = GridLayout::choose(360, 640, Size::new(1920.0, 1080.0), Size::new(1280.0, 720.0));
        assert_eq!(layout.arrangement, GridArrangement::Stacked);
        let top = layout.cells[0];
        assert_eq!(top.cell, PixelRect { x: 0, y: 0, width: 360, height: 320 });
        assert_eq!(top.content.width, 360);
        assert_eq!(top.content.height, 202);
        assert_eq!(layout.cells[1].cell.y, 320);
    }

    #[test]
    fn portrait_inputs_go_side_by_side() {
        let layout = GridLayout::choose(640, 480, Size::new(1080.0, 1920.0), Size::new(720.0, 1280.0));
        assert_eq!(layout.arrangement, GridArrangement::SideBySide);
        assert_eq!(layout.cells[1].cell.x, 320);
        // Height-bound: 480 tall, 270 wide, centered in the 320-wide cell.
        assert_eq!(layout.cells[0].content.height, 480);
        assert_eq!(layout.cells[0].content.width, 270);
        assert_eq!(layout.cells[0].content.x, 25);
    }

    #[test]
    fn missing_video_leaves_empty_content() {
        let layout = GridLayout::choose(100, 100, Size::ZERO, Size::new(10.0, 10.0));
        assert!(layout.cells[0].content.is_empty());
        assert!(!layout.cells[1].content.is_empty());
    }

    #[test]
    fn ties_follow_canvas_orientation() {
        let square = Size::new(10.0, 10.0);
        assert_eq!(
            GridLayout::choose(100, 100, square, square).arrangement,
            GridArrangement::Stacked
        );
        assert_eq!(
            GridLayout::choose(101, 100, Size::ZERO, Size::ZERO).arrangement,
            GridArrangement::SideBySide
        );
    }

    proptest! {
        #[test]
        fn content_stays_inside_its_cell(
            canvas_w in 1u32..2000,
            canvas_h in 1u32..2000,
            w in 1u32..4000,
            h in 1u32..4000,
        ) {
            let layout = GridLayout::choose(canvas_w, canvas_h, Size::from_pixels(w, h), Size::from_pixels(h, w));
            prop_assert!((0.0..=1.0 + 1e-9).contains(&layout.coverage));
            for cell in layout.cells {
                prop_assert!(cell.content.x >= cell.cell.x);
                prop_assert!(cell.content.y >= cell.cell.y);
                prop_assert!(cell.content.x + cell.content.width <= cell.cell.x + cell.cell.width);
                prop_assert!(cell.content.y + cell.content.height <= cell.cell.y + cell.cell.height);
                prop_assert!(cell.cell.x + cell.cell.width <= canvas_w);
                prop_assert!(cell.cell.y + cell.cell.height <= canvas_h);
            }
        }
    }
}
