//! Headset application capabilities driven by the remote.
//!
//! The study application is split into three capabilities: the model being
//! shown, the film-grain noise overlay and the perceptual manipulation
//! configs. [`StudyController`] composes them into a [`RemoteHandler`].

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
   bluetooth::session::PeerSession,
   remote::{
      bridge::{Handled, RemoteHandler},
      protocol::{INVALID_CONFIG_NAME, StateSnapshot},
   },
};

/// Material applied to the displayed model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialKind {
   Opaque,
   Transparent,
   /// Highlight material used while aligning; `rotation` selects the
   /// rotation variant over the translation one.
   FineTuning { rotation: bool },
}

pub trait ModelControl {
   fn is_visible(&self) -> bool;
   fn toggle_visibility(&mut self, fade: bool);
   fn apply_material(&mut self, kind: MaterialKind);
   fn fade_duration(&self) -> Duration;
   fn set_fade_duration(&mut self, duration: Duration);
}

/// Film grain texture of the noise overlay.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum GrainTexture {
   #[default]
   #[strum(serialize = "Large_A")]
   LargeA,
   #[strum(serialize = "Large_B")]
   LargeB,
   #[strum(serialize = "Medium_A")]
   MediumA,
   #[strum(serialize = "Medium_B")]
   MediumB,
   #[strum(serialize = "Medium_C")]
   MediumC,
   #[strum(serialize = "Medium_D")]
   MediumD,
   #[strum(serialize = "Medium_E")]
   MediumE,
   #[strum(serialize = "Medium_F")]
   MediumF,
   #[strum(serialize = "Thin_A")]
   ThinA,
   #[strum(serialize = "Thin_B")]
   ThinB,
}

impl GrainTexture {
   /// Cycle order, coarse to fine.
   pub const ALL: [Self; 10] = [
      Self::LargeA,
      Self::LargeB,
      Self::MediumA,
      Self::MediumB,
      Self::MediumC,
      Self::MediumD,
      Self::MediumE,
      Self::MediumF,
      Self::ThinA,
      Self::ThinB,
   ];

   fn position(self) -> usize {
      Self::ALL.iter().position(|&t| t == self).unwrap_or(0)
   }

   pub fn next(self) -> Self {
      Self::ALL[(self.position() + 1) % Self::ALL.len()]
   }

   pub fn previous(self) -> Self {
      Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
   }
}

pub trait NoiseControl {
   fn is_active(&self) -> bool;
   fn toggle(&mut self);
   fn grain_texture(&self) -> GrainTexture;
   fn set_grain_texture(&mut self, texture: GrainTexture);
}

/// The perceptual manipulation configs of a study.
pub trait ManipulationControl {
   fn count(&self) -> usize;
   fn name(&self, index: usize) -> Option<SmolStr>;
   fn active_index(&self) -> usize;
   fn select(&mut self, index: usize);
   fn start(&mut self);
   fn stop(&mut self);
   fn realign(&mut self);
   fn next_painting(&mut self);
}

pub struct StudyController<M, N, P> {
   model: M,
   noise: N,
   manipulations: P,
}

impl<M, N, P> StudyController<M, N, P>
where
   M: ModelControl,
   N: NoiseControl,
   P: ManipulationControl,
{
   pub const fn new(model: M, noise: N, manipulations: P) -> Self {
      Self {
         model,
         noise,
         manipulations,
      }
   }

   pub const fn model(&self) -> &M {
      &self.model
   }

   pub const fn noise(&self) -> &N {
      &self.noise
   }

   pub const fn manipulations(&self) -> &P {
      &self.manipulations
   }

   /// Shows the model with the fine-tuning material while it is aligned.
   pub fn begin_alignment(&mut self, rotation: bool) -> Handled {
      self.model.apply_material(MaterialKind::FineTuning { rotation });
      self.set_model_visible(true, false)
   }

   pub fn end_alignment(&mut self) {
      self.model.apply_material(MaterialKind::Opaque);
   }

   pub fn next_grain_texture(&mut self) -> GrainTexture {
      let texture = self.noise.grain_texture().next();
      self.noise.set_grain_texture(texture);
      debug!("Grain texture: {texture}");
      texture
   }

   pub fn previous_grain_texture(&mut self) -> GrainTexture {
      let texture = self.noise.grain_texture().previous();
      self.noise.set_grain_texture(texture);
      debug!("Grain texture: {texture}");
      texture
   }
}

impl<M, N, P> RemoteHandler for StudyController<M, N, P>
where
   M: ModelControl,
   N: NoiseControl,
   P: ManipulationControl,
{
   fn config_name(&self, index: u8) -> SmolStr {
      self
         .manipulations
         .name(usize::from(index))
         .unwrap_or_else(|| INVALID_CONFIG_NAME.into())
   }

   fn config_count(&self) -> u8 {
      u8::try_from(self.manipulations.count()).unwrap_or(u8::MAX)
   }

   fn snapshot(&self) -> StateSnapshot {
      StateSnapshot {
         model_visible: self.model.is_visible(),
         noise_active: self.noise.is_active(),
         active_config: u8::try_from(self.manipulations.active_index()).unwrap_or(u8::MAX),
      }
   }

   fn set_model_visible(&mut self, visible: bool, fade: bool) -> Handled {
      if self.model.is_visible() == visible {
         return Handled::Unchanged;
      }
      self.model.toggle_visibility(fade);
      Handled::StateChanged
   }

   fn set_noise_active(&mut self, active: bool) -> Handled {
      if self.noise.is_active() == active {
         return Handled::Unchanged;
      }
      self.noise.toggle();
      Handled::StateChanged
   }

   fn stop_and_realign(&mut self) -> Handled {
      self.manipulations.stop();
      self.manipulations.realign();
      Handled::Unchanged
   }

   fn select_config(&mut self, index: u8) -> Handled {
      let index = usize::from(index);
      if index >= self.manipulations.count() {
         debug!("Ignoring selection of unknown config {index}");
         return Handled::Unchanged;
      }
      self.manipulations.select(index);
      info!("Config chosen: {index}");
      Handled::StateChanged
   }

   fn set_config_active(&mut self, active: bool) -> Handled {
      if active {
         self.manipulations.start();
      } else {
         self.manipulations.stop();
      }
      Handled::Unchanged
   }

   fn next_painting(&mut self) -> Handled {
      self.manipulations.next_painting();
      Handled::Unchanged
   }

   fn on_text(&mut self, session: &PeerSession, text: &str) {
      info!("Remote {} sent string input: {text}", session.name());
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[derive(Default)]
   struct Model {
      visible: bool,
      toggles: Vec<bool>,
      material: Option<MaterialKind>,
      fade: Duration,
   }

   impl ModelControl for Model {
      fn is_visible(&self) -> bool {
         self.visible
      }

      fn toggle_visibility(&mut self, fade: bool) {
         self.visible = !self.visible;
         self.toggles.push(fade);
      }

      fn apply_material(&mut self, kind: MaterialKind) {
         self.material = Some(kind);
      }

      fn fade_duration(&self) -> Duration {
         self.fade
      }

      fn set_fade_duration(&mut self, duration: Duration) {
         self.fade = duration;
      }
   }

   #[derive(Default)]
   struct Noise {
      active: bool,
      texture: GrainTexture,
   }

   impl NoiseControl for Noise {
      fn is_active(&self) -> bool {
         self.active
      }

      fn toggle(&mut self) {
         self.active = !self.active;
      }

      fn grain_texture(&self) -> GrainTexture {
         self.texture
      }

      fn set_grain_texture(&mut self, texture: GrainTexture) {
         self.texture = texture;
      }
   }

   #[derive(Default)]
   struct Configs {
      active: usize,
      log: Vec<&'static str>,
   }

   impl ManipulationControl for Configs {
      fn count(&self) -> usize {
         2
      }

      fn name(&self, index: usize) -> Option<SmolStr> {
         ["Rotate", "Scale"].get(index).map(|&n| n.into())
      }

      fn active_index(&self) -> usize {
         self.active
      }

      fn select(&mut self, index: usize) {
         self.active = index;
      }

      fn start(&mut self) {
         self.log.push("start");
      }

      fn stop(&mut self) {
         self.log.push("stop");
      }

      fn realign(&mut self) {
         self.log.push("realign");
      }

      fn next_painting(&mut self) {
         self.log.push("painting");
      }
   }

   fn controller() -> StudyController<Model, Noise, Configs> {
      StudyController::new(Model::default(), Noise::default(), Configs::default())
   }

   #[test]
   fn test_grain_texture_cycles() {
      assert_eq!(GrainTexture::LargeA.next(), GrainTexture::LargeB);
      assert_eq!(GrainTexture::MediumF.next(), GrainTexture::ThinA);
      assert_eq!(GrainTexture::ThinB.next(), GrainTexture::LargeA);
      assert_eq!(GrainTexture::LargeA.previous(), GrainTexture::ThinB);
      assert_eq!(GrainTexture::MediumA.previous(), GrainTexture::LargeB);

      let mut texture = GrainTexture::MediumC;
      for _ in 0..GrainTexture::ALL.len() {
         texture = texture.next();
      }
      assert_eq!(texture, GrainTexture::MediumC);
      assert_eq!(GrainTexture::ThinA.to_string(), "Thin_A");
      assert_eq!("Medium_E".parse::<GrainTexture>().unwrap(), GrainTexture::MediumE);
   }

   #[test]
   fn test_visibility_toggles_only_on_change() {
      let mut c = controller();
      assert_eq!(c.set_model_visible(false, true), Handled::Unchanged);
      assert!(c.model().toggles.is_empty());

      assert_eq!(c.set_model_visible(true, true), Handled::StateChanged);
      assert_eq!(c.model().toggles, [true]);
      assert_eq!(c.set_model_visible(true, false), Handled::Unchanged);
      assert_eq!(c.model().toggles.len(), 1);
   }

   #[test]
   fn test_noise_toggles_only_on_change() {
      let mut c = controller();
      assert_eq!(c.set_noise_active(true), Handled::StateChanged);
      assert_eq!(c.set_noise_active(true), Handled::Unchanged);
      assert!(c.noise().is_active());
      assert_eq!(c.set_noise_active(false), Handled::StateChanged);
   }

   #[test]
   fn test_config_names_and_selection() {
      let mut c = controller();
      assert_eq!(c.config_count(), 2);
      assert_eq!(c.config_name(1), "Scale");
      assert_eq!(c.config_name(7), INVALID_CONFIG_NAME);

      assert_eq!(c.select_config(1), Handled::StateChanged);
      assert_eq!(c.select_config(5), Handled::Unchanged);
      assert_eq!(c.snapshot().active_config, 1);
   }

   #[test]
   fn test_manipulation_commands() {
      let mut c = controller();
      c.set_config_active(true);
      c.set_config_active(false);
      c.stop_and_realign();
      c.next_painting();
      assert_eq!(
         c.manipulations().log,
         ["start", "stop", "stop", "realign", "painting"]
      );
   }

   #[test]
   fn test_alignment_material() {
      let mut c = controller();
      assert_eq!(c.begin_alignment(true), Handled::StateChanged);
      assert_eq!(c.model().material, Some(MaterialKind::FineTuning { rotation: true }));
      assert!(c.model().is_visible());
      c.end_alignment();
      assert_eq!(c.model().material, Some(MaterialKind::Opaque));
   }

   #[test]
   fn test_snapshot() {
      let mut c = controller();
      c.set_model_visible(true, false);
      assert_eq!(
         c.snapshot(),
         StateSnapshot {
            model_visible: true,
            noise_active: false,
            active_config: 0,
         }
      );
      assert_eq!(c.next_grain_texture(), GrainTexture::LargeB);
      assert_eq!(c.previous_grain_texture(), GrainTexture::LargeA);
   }
}
