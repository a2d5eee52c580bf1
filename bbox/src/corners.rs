use crate::{common::*, CenterSize, Rect};

/// Bounding box in corner (x1, y1, x2, y2) format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners<T> {
    pub(crate) x1: T,
    pub(crate) y1: T,
    pub(crate) x2: T,
    pub(crate) y2: T,
}

impl<T> Corners<T> {
    pub fn try_cast<V>(self) -> Option<Corners<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(Corners {
            x1: V::from(self.x1)?,
            y1: V::from(self.y1)?,
            x2: V::from(self.x2)?,
            y2: V::from(self.y2)?,
        })
    }

    pub fn cast<V>(self) -> Corners<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> Corners<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn try_new(x1: T, y1: T, x2: T, y2: T) -> Result<Self> {
        ensure!(x2 >= x1 && y2 >= y1, "x2 >= x1 and y2 >= y1 must hold");
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn to_center_size(&self) -> CenterSize<T> {
        CenterSize {
            cx: self.cx(),
            cy: self.cy(),
            w: self.w(),
            h: self.h(),
        }
    }

    pub fn scale(&self, sx: T, sy: T) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }
}

impl<T> Corners<T>
where
    T: Copy + Float,
{
    /// Clamp all corners into the [0, max] range of each axis.
    pub fn clip(&self, max_x: T, max_y: T) -> Self {
        let zero = T::zero();
        Self {
            x1: self.x1.max(zero).min(max_x),
            y1: self.y1.max(zero).min(max_y),
            x2: self.x2.max(zero).min(max_x),
            y2: self.y2.max(zero).min(max_y),
        }
    }
}

impl<T> Rect for Corners<T>
where
    T: Copy + Num,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        self.x1
    }

    fn y1(&self) -> Self::Type {
        self.y1
    }

    fn x2(&self) -> Self::Type {
        self.x2
    }

    fn y2(&self) -> Self::Type {
        self.y2
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.x1 + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.y1 + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.x2 - self.x1
    }

    fn h(&self) -> Self::Type {
        self.y2 - self.y1
    }
}

impl<T> From<CenterSize<T>> for Corners<T>
where
    T: Copy + Num,
{
    fn from(from: CenterSize<T>) -> Self {
        let two = T::one() + T::one();
        let CenterSize { cx, cy, w, h } = from;
        Self {
            x1: cx - w / two,
            y1: cy - h / two,
            x2: cx + w / two,
            y2: cy + h / two,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectFloat;

    #[test]
    fn corners_ordering_is_enforced() {
        assert!(Corners::try_new(3.0, 0.0, 1.0, 2.0).is_err());
        assert!(Corners::try_new(0.0, 5.0, 1.0, 2.0).is_err());
        assert!(Corners::try_new(1.0, 1.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn center_size_round_trip() -> Result<()> {
        let boxes = [
            Corners::try_new(0.0, 0.0, 4.0, 6.0)?,
            Corners::try_new(3.0, 7.0, 11.0, 12.0)?,
            Corners::try_new(-5.0, -2.0, 5.0, 2.0)?,
        ];
        for orig in boxes {
            let restored = Corners::from(orig.to_center_size());
            assert_eq!(orig, restored);
        }
        Ok(())
    }

    #[test]
    fn iou_laws() -> Result<()> {
        let a = Corners::try_new(0.0, 0.0, 4.0, 4.0)?;
        let b = Corners::try_new(2.0, 2.0, 6.0, 6.0)?;
        let far = Corners::try_new(10.0, 10.0, 12.0, 12.0)?;
        let degenerate = Corners::try_new(1.0, 1.0, 1.0, 5.0)?;

        assert_eq!(a.iou_with(&a), 1.0);
        assert_eq!(a.iou_with(&b), b.iou_with(&a));
        assert_eq!(a.iou_with(&b), 4.0 / 28.0);
        assert_eq!(a.iou_with(&far), 0.0);
        assert_eq!(a.iou_with(&degenerate), 0.0);
        assert_eq!(degenerate.iou_with(&degenerate), 0.0);
        Ok(())
    }

    #[test]
    fn clip_bounds() -> Result<()> {
        let clipped = Corners::try_new(-3.0, 2.0, 15.0, 9.0)?.clip(10.0, 8.0);
        assert_eq!(clipped, Corners::try_new(0.0, 2.0, 10.0, 8.0)?);
        Ok(())
    }
}
