use crate::{common::*, CenterSize, Corners, Rect};

/// Box regression offsets relative to an anchor box.
///
/// Center offsets are expressed in anchor widths/heights, sizes as the
/// logarithm of the size ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxDelta<T> {
    pub dx: T,
    pub dy: T,
    pub dw: T,
    pub dh: T,
}

impl<T> BoxDelta<T>
where
    T: Float,
{
    /// Offsets that map `anchor` onto `target`.
    pub fn encode(anchor: &Corners<T>, target: &Corners<T>) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            anchor.w() > zero && anchor.h() > zero,
            "anchor must have positive size"
        );
        ensure!(
            target.w() > zero && target.h() > zero,
            "target must have positive size"
        );

        Ok(Self {
            dx: (target.cx() - anchor.cx()) / anchor.w(),
            dy: (target.cy() - anchor.cy()) / anchor.h(),
            dw: (target.w() / anchor.w()).ln(),
            dh: (target.h() / anchor.h()).ln(),
        })
    }

    /// The box obtained by applying the offsets to `anchor`.
    pub fn decode(&self, anchor: &Corners<T>) -> CenterSize<T> {
        CenterSize {
            cx: anchor.cx() + self.dx * anchor.w(),
            cy: anchor.cy() + self.dy * anchor.h(),
            w: anchor.w() * self.dw.exp(),
            h: anchor.h() * self.dh.exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_rejects_degenerate_boxes() -> Result<()> {
        let anchor = Corners::try_new(0.0, 0.0, 4.0, 4.0)?;
        let flat = Corners::try_new(1.0, 1.0, 5.0, 1.0)?;
        assert!(BoxDelta::encode(&flat, &anchor).is_err());
        assert!(BoxDelta::encode(&anchor, &flat).is_err());
        Ok(())
    }

    #[test]
    fn decode_inverts_encode() -> Result<()> {
        let anchor = Corners::try_new(2.0, 4.0, 10.0, 12.0)?;
        let target = Corners::try_new(3.0, 1.0, 15.0, 9.0)?;

        let delta = BoxDelta::encode(&anchor, &target)?;
        let restored = delta.decode(&anchor).to_corners();

        assert_abs_diff_eq!(restored.x1(), target.x1(), epsilon = 1e-9);
        assert_abs_diff_eq!(restored.y1(), target.y1(), epsilon = 1e-9);
        assert_abs_diff_eq!(restored.x2(), target.x2(), epsilon = 1e-9);
        assert_abs_diff_eq!(restored.y2(), target.y2(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn identity_boxes_encode_to_zero() -> Result<()> {
        let anchor = Corners::try_new(1.0, 2.0, 7.0, 8.0)?;
        let delta = BoxDelta::encode(&anchor, &anchor)?;
        assert_eq!(
            delta,
            BoxDelta {
                dx: 0.0,
                dy: 0.0,
                dw: 0.0,
                dh: 0.0
            }
        );
        Ok(())
    }
}
