use crate::{common::*, Corners, Rect};

/// Bounding box in center/size (cx, cy, w, h) format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterSize<T> {
    pub(crate) cx: T,
    pub(crate) cy: T,
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> CenterSize<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn try_new(cx: T, cy: T, w: T, h: T) -> Result<Self> {
        let zero = T::zero();
        ensure!(w >= zero && h >= zero, "w and h must be non-negative");
        Ok(Self { cx, cy, w, h })
    }

    pub fn to_corners(&self) -> Corners<T> {
        Corners::from(*self)
    }
}

impl<T> Rect for CenterSize<T>
where
    T: Copy + Num,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn y1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn x2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn y2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn cx(&self) -> Self::Type {
        self.cx
    }

    fn cy(&self) -> Self::Type {
        self.cy
    }

    fn w(&self) -> Self::Type {
        self.w
    }

    fn h(&self) -> Self::Type {
        self.h
    }
}

impl<T> From<Corners<T>> for CenterSize<T>
where
    T: Copy + Num + PartialOrd,
{
    fn from(from: Corners<T>) -> Self {
        from.to_center_size()
    }
}
